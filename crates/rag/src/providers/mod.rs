//! RAG provider implementations.

pub mod http;
pub mod mock;

pub use http::HttpRagProvider;
pub use mock::MockRagProvider;
