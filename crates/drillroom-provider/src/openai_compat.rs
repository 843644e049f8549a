//! OpenAI-compatible chat endpoints that only differ by base URL.

use crate::OpenAiProvider;

pub const OPENAI_BASE: &str = "https://api.openai.com/v1";

/// OpenRouter, multi-model router
/// https://openrouter.ai/docs
pub fn openrouter(api_key: impl Into<String>) -> OpenAiProvider {
    OpenAiProvider::new(api_key, "https://openrouter.ai/api/v1")
}

/// Local Ollama, default http://localhost:11434/v1
pub fn ollama() -> OpenAiProvider {
    ollama_with_base("http://localhost:11434/v1")
}

pub fn ollama_with_base(base_url: impl Into<String>) -> OpenAiProvider {
    // Ollama ignores the key but the header is still sent
    OpenAiProvider::new("ollama", base_url)
}

pub fn custom(api_key: impl Into<String>, base_url: impl Into<String>) -> OpenAiProvider {
    OpenAiProvider::new(api_key, base_url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_construct() {
        assert!(std::mem::size_of_val(&openrouter("or-test")) > 0);
        assert!(std::mem::size_of_val(&ollama()) > 0);
        assert!(std::mem::size_of_val(&custom("key", "https://llm.internal/v1")) > 0);
    }
}
