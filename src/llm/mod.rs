//! Reply suggestions from an LLM.
//!
//! The core never calls this; the HTTP layer does, and treats it as an
//! opaque `generate(body, context) -> Vec<String>`.

mod anthropic;

pub use anthropic::AnthropicSuggester;

use async_trait::async_trait;

use crate::error::LlmError;
use crate::mail::sanitize_reply_text;

/// Maximum number of suggestions returned per message.
pub const MAX_SUGGESTIONS: usize = 3;

/// Shown when the provider fails.
pub const FALLBACK_SUGGESTION: &str = "Sorry, I couldn't generate suggestions at this time.";

/// Produces candidate reply texts for an email body.
#[async_trait]
pub trait ReplySuggester: Send + Sync {
    /// Provider name, for logs.
    fn name(&self) -> &str;

    /// Up to [`MAX_SUGGESTIONS`] cleaned reply candidates.
    async fn suggest(&self, body: &str, context: Option<&str>) -> Result<Vec<String>, LlmError>;
}

/// Prompt asking for three short replies, one per line.
pub fn build_prompt(body: &str, context: Option<&str>) -> String {
    let context = context.map(str::trim).filter(|c| !c.is_empty());

    let mut prompt = format!("Here's an email I received:\n\n\"{body}\"\n\n");
    if let Some(context) = context {
        prompt.push_str(&format!("My personal context: {context}\n\n"));
    }
    prompt.push_str(&format!(
        "Please suggest {MAX_SUGGESTIONS} short, friendly replies.\n\
         Make each reply concise and direct, no more than 2-3 sentences.\n\
         DO NOT include any numbering (1., 2., etc.) or quotation marks in your replies.\n"
    ));
    if context.is_some() {
        prompt.push_str("Incorporate my personal context in the replies.\n");
    }
    prompt.push_str("Each reply should be on its own line, separated by line breaks.");
    prompt
}

/// One suggestion per non-empty line, sanitized, at most [`MAX_SUGGESTIONS`].
pub fn clean_suggestions(text: &str) -> Vec<String> {
    text.lines()
        .map(sanitize_reply_text)
        .filter(|line| !line.is_empty())
        .take(MAX_SUGGESTIONS)
        .collect()
}
