// Gemini vision client and receipt extraction: HTTP transport, retry with
// backoff, prompt construction and lenient parsing of the model's JSON.

pub mod client;
pub mod error;
pub mod prompt;
pub mod receipt;
pub mod retry;

pub use client::{GeminiClient, Generation, InlineImage, LlmClient};
pub use error::LlmError;
pub use receipt::{parse_receipt_response, read_receipt, DocumentKind, LineItem, ReceiptAnalysis};
pub use retry::RetryPolicy;
