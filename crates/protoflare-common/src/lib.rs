//! # Common types for the Protoflare AT Protocol client
//!
//! This crate holds the pieces every other Protoflare crate builds on:
//!
//! - Validated identifier types: [`Did`](types::did::Did), [`Handle`](types::handle::Handle)
//!   and [`AtIdentifier`](types::ident::AtIdentifier)
//! - The DID document model ([`DidDocument`](types::did_doc::DidDocument))
//! - The [`HttpClient`](http_client::HttpClient) transport abstraction, with a
//!   `reqwest` implementation and a cancellation wrapper
//! - The [`KeyValueStore`](store::KeyValueStore) abstraction over durable
//!   key-value storage with per-entry expiry, plus in-memory and file-backed
//!   implementations
//!
//! ## Cancellation
//!
//! Every network operation in Protoflare runs over an `HttpClient`. Wrap the
//! client with [`with_cancellation`](http_client::HttpClientExt::with_cancellation)
//! to make all in-flight requests fail promptly with
//! [`TransportError::Cancelled`](error::TransportError::Cancelled) once the token
//! fires.
//!
//! ```no_run
//! use protoflare_common::http_client::HttpClientExt;
//! use tokio_util::sync::CancellationToken;
//!
//! let token = CancellationToken::new();
//! let http = reqwest::Client::new().with_cancellation(token.clone());
//! // hand `http` to a resolver or OAuth client, call `token.cancel()` to abort
//! ```

#![warn(missing_docs)]

/// Error types for transport and storage
pub mod error;
/// Minimal HTTP client abstraction shared across crates
pub mod http_client;
/// Durable key-value storage abstraction
pub mod store;
/// Identifier and document types
pub mod types;

pub use error::{StoreError, TransportError};
pub use http_client::{Cancellable, HttpClient, HttpClientExt};
pub use smol_str;
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use tokio_util::sync::CancellationToken;
pub use types::{
    did::Did,
    did_doc::{DidDocument, Service},
    handle::Handle,
    ident::AtIdentifier,
};
pub use url;
