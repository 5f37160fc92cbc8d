//! Translation provider seam. The orchestrator only knows this trait; the
//! production implementation is [`super::openai::OpenAiClient`].

use async_trait::async_trait;

use super::TranslateError;

#[async_trait]
pub trait TranslationProvider: Send + Sync {
    /// Single-turn completion: `system_instruction` constrains the model,
    /// `text` is the payload to translate. An empty string means the
    /// provider produced nothing.
    async fn translate(&self, system_instruction: &str, text: &str)
        -> Result<String, TranslateError>;
}

/// Instruction restricting the model to a bare translation with no commentary.
pub fn system_instruction(source_lang: &str, target_lang: &str) -> String {
    format!(
        "You are a helpful translation assistant. Translate the given text from {} to {}. \
         Only provide the translated text, without any additional explanations or conversational phrases.",
        source_lang.trim(),
        target_lang.trim()
    )
}
