pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod presets;

pub use anthropic::AnthropicClient;
pub use gemini::GeminiClient;
pub use openai::OpenAiClient;
