//! HTTP transport for the stock platform API.
//!
//! This crate maps the store contracts from `chat_contract` onto the platform's
//! REST routes under `/api/v1` and adapts the `chat/stream` response body into
//! [`chat_contract::TurnFrame`]s. It owns URL building, headers, retry policy
//! and error mapping; composition, reconciliation and transcript state live
//! elsewhere.

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod headers;
pub mod payload;
pub mod retry;
pub mod sse;
pub mod url;

pub use backend::{frame_stream, HttpBackend};
pub use client::{RetryPolicy, StockApiClient};
pub use config::ApiConfig;
pub use error::ApiError;
pub use sse::FrameParser;
pub use url::normalize_api_base;
