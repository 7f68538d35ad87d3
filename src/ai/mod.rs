mod client;
mod types;

pub use client::AnthropicClient;
pub use types::*;
