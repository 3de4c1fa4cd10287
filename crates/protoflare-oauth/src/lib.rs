//! AT Protocol OAuth client: pushed authorization requests with PKCE,
//! DPoP-bound tokens and per-identity credential storage.
//!
//! The flow is [`OAuthClient::authorize`] to get a redirect URL,
//! [`OAuthClient::exchange`] once the user comes back, and
//! [`OAuthClient::restore`] for later runs. Each of these hands out an
//! [`AuthenticatedApiClient`] that signs requests to the account's PDS.

pub mod atproto;
pub mod client;
pub mod dpop;
pub mod error;
pub mod jose;
pub mod keys;
pub mod request;
pub mod session;
pub mod store;
pub mod types;
pub mod utils;

pub use atproto::ClientConfig;
pub use client::OAuthClient;
pub use dpop::{DpopExt, DpopOptions};
pub use error::{ErrorKind, OAuthError, Result};
pub use keys::{DpopKey, PortableKeyPair};
pub use session::{AuthenticatedApiClient, ClientRuntimeState, User};
pub use store::{CredentialRecord, CredentialRepository, PendingAuthorization};
pub use types::CallbackParams;
