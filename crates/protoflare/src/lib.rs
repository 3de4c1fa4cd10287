//! # Protoflare
//!
//! AT Protocol OAuth for Rust: log users in through their own authorization
//! server, keep their DPoP-bound credentials across restarts, and call their
//! PDS with signed requests.
//!
//! The pieces live in separate crates and are re-exported here:
//!
//! - [`common`]: identifier types, the [`HttpClient`](common::HttpClient) and
//!   [`KeyValueStore`](common::KeyValueStore) seams, in-memory and file stores
//! - [`identity`]: handle and DID resolution, authorization server discovery
//! - [`oauth`]: PAR + PKCE authorization, token exchange and refresh, DPoP
//!
//! ## Example
//!
//! ```no_run
//! use protoflare::common::{AtIdentifier, FileStore};
//! use protoflare::identity::ProtoflareResolver;
//! use protoflare::oauth::{CallbackParams, ClientConfig, CredentialRepository, OAuthClient};
//! # use miette::IntoDiagnostic;
//!
//! # async fn run() -> miette::Result<()> {
//! let config = ClientConfig::new("http://localhost:8787".parse().into_diagnostic()?).build();
//! let client = OAuthClient::new(
//!     reqwest::Client::new(),
//!     ProtoflareResolver::default(),
//!     CredentialRepository::new(FileStore::new("/tmp/protoflare-store.json")),
//!     config,
//! );
//!
//! // send the user here...
//! let ident: AtIdentifier = "alice.bsky.social".parse()?;
//! println!("{}", client.authorize(&ident).await?);
//!
//! // ...and finish once they come back to the callback URL
//! # let callback_url: url::Url = "http://127.0.0.1:8787/oauth/callback?code=c&iss=i&state=s".parse().into_diagnostic()?;
//! let params = CallbackParams::from_url(&callback_url)?;
//! let (user, mut api) = client.exchange(&params).await?;
//! let session = api
//!     .xrpc_query("com.atproto.server.getSession", &Vec::<(&str, &str)>::new())
//!     .await?;
//! println!("{user}: {session}");
//! api.flush().await;
//! # Ok(())
//! # }
//! ```

pub use protoflare_common as common;
pub use protoflare_identity as identity;
pub use protoflare_oauth as oauth;

pub use protoflare_common::{AtIdentifier, Did, Handle};
pub use protoflare_oauth::{AuthenticatedApiClient, OAuthClient, OAuthError, User};
