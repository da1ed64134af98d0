//! KGX Oracle - text-to-triples oracle access
//!
//! Everything between a piece of text and the triples an external model
//! extracts from it: prompt rendering, HTTP oracles, answer parsing, retry,
//! concurrency limiting and result caching.
//!
//! Author: hephaex@gmail.com

pub mod cache;
pub mod client;
pub mod llm;
pub mod prompts;
pub mod response;
pub mod retry;

pub use cache::{hash_text, CacheStats, CacheStatsReport, ResultCache};
pub use client::{OracleClient, BUSY_MESSAGE};
pub use llm::{create_oracle, ChatCompletionOracle, OllamaOracle};
pub use response::{parse_answer, ParsedPayload, DEFAULT_CONFIDENCE};
pub use retry::RetryPolicy;
