//! Prompt templating for edit job submission

use serde::{Deserialize, Serialize};

/// Suffix appended to every prompt so the model drops the drawn mask outline
pub const DEFAULT_PROMPT_SUFFIX: &str = "Do not add the outline in the final image.";

/// Wraps the caller's prompt with a fixed instruction suffix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// Instruction appended after the user prompt
    pub suffix: String,
    /// Wrap the rendered prompt in literal double quotes
    pub quote: bool,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            suffix: DEFAULT_PROMPT_SUFFIX.to_string(),
            quote: true,
        }
    }
}

impl PromptTemplate {
    pub fn new<S: Into<String>>(suffix: S, quote: bool) -> Self {
        Self {
            suffix: suffix.into(),
            quote,
        }
    }

    /// Render the prompt sent to the edit service
    ///
    /// A missing or blank prompt renders the suffix alone. An empty suffix
    /// renders the prompt alone.
    ///
    /// ```rust
    /// use mask_recontext::PromptTemplate;
    ///
    /// let template = PromptTemplate::default();
    /// assert_eq!(
    ///     template.render(Some("add a blue sky")),
    ///     "\"add a blue sky. Do not add the outline in the final image.\""
    /// );
    /// ```
    #[must_use]
    pub fn render(&self, prompt: Option<&str>) -> String {
        let prompt = prompt
            .map(|p| p.trim_start().trim_end_matches(|c: char| c == '.' || c.is_whitespace()))
            .filter(|p| !p.is_empty());
        let suffix = self.suffix.trim();

        let body = match (prompt, suffix.is_empty()) {
            (Some(p), false) => format!("{}. {}", p, suffix),
            (Some(p), true) => p.to_string(),
            (None, _) => suffix.to_string(),
        };

        if self.quote {
            format!("\"{}\"", body)
        } else {
            body
        }
    }
}
