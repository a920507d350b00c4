//! RAG provider integration crate for kbchat.
//!
//! This crate provides a provider-agnostic abstraction over retrieve-and-generate
//! services: a question goes in together with the knowledge base, model and an
//! optional session token; an answer, a continued session token and the raw
//! citations come back.
//!
//! # Providers
//! - **http**: JSON retrieve-and-generate endpoint (default)
//! - **mock**: scripted responses for tests and offline use
//!
//! # Example
//! ```no_run
//! use kbchat_rag::{RagProvider, RagRequest, providers::HttpRagProvider};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = HttpRagProvider::new("http://localhost:8080");
//! let request = RagRequest::new("What is the refund policy?", "KB1", "model-a");
//! let response = provider.retrieve_and_generate(&request).await?;
//! println!("{}", response.answer);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod factory;
pub mod providers;

// Re-export main types
pub use client::{RagProvider, RagRequest, RagResponse, RawCitation};
pub use error::ProviderError;
pub use factory::create_provider;
pub use providers::{HttpRagProvider, MockRagProvider};
