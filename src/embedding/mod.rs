//! Query embedding for the vector backends.
//!
//! Vector backends turn the (expanded) query into a vector before searching.
//! [`ApiEmbeddingProvider`] talks to any OpenAI-compatible `/embeddings`
//! endpoint.

mod api;
mod traits;

pub use api::ApiEmbeddingProvider;
pub(crate) use api::ErrorResponse;
pub use traits::EmbeddingProvider;
