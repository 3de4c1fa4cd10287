use std::fmt;

use http::header::{ACCEPT, CONTENT_TYPE};
use http::{Method, Request, Response};
use protoflare_common::Did;
use protoflare_common::error::TransportError;
use protoflare_common::http_client::HttpClient;
use serde::Serialize;
use serde_json::Value;
use smol_str::SmolStr;
use tokio_util::task::TaskTracker;
use url::Url;

use crate::dpop::{DpopOptions, dpop_send};
use crate::error::{OAuthError, Result};
use crate::keys::DpopKey;
use crate::store::{CredentialRecord, CredentialRepository};

/// Service used for unauthenticated calls
pub const PUBLIC_SERVICE: &str = "https://public.api.bsky.app/";

/// The logged-in account, as shown to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub did: Did,
    pub handle: SmolStr,
    pub service_endpoint: Url,
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) on {}", self.handle, self.did, self.service_endpoint)
    }
}

/// Live credentials for one identity
#[derive(Debug, Clone)]
pub struct ClientRuntimeState {
    pub access_token: SmolStr,
    pub auth_server: Url,
    pub did: Did,
    pub dpop_nonce: SmolStr,
    pub handle: SmolStr,
    pub keypair: DpopKey,
    pub service_endpoint: Url,
    pub refresh_token: Option<SmolStr>,
}

impl ClientRuntimeState {
    pub fn user(&self) -> User {
        User {
            did: self.did.clone(),
            handle: self.handle.clone(),
            service_endpoint: self.service_endpoint.clone(),
        }
    }

    pub fn to_record(&self) -> CredentialRecord {
        CredentialRecord {
            auth_server: self.auth_server.clone(),
            dpop_nonce: self.dpop_nonce.clone(),
            handle: self.handle.clone(),
            service_endpoint: self.service_endpoint.clone(),
            refresh_token: self.refresh_token.clone(),
            keys: self.keypair.to_portable(),
        }
    }
}

/// API client for one identity, or for anonymous calls to the public service.
///
/// Authenticated requests go to the account's PDS with DPoP proofs. Nonce
/// rotations are saved to the credential store in the background; call
/// [`flush`](Self::flush) before dropping the client to wait for them.
pub struct AuthenticatedApiClient<C> {
    http: C,
    repo: CredentialRepository,
    state: Option<ClientRuntimeState>,
    public_service: Url,
    tasks: TaskTracker,
}

impl<C> fmt::Debug for AuthenticatedApiClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatedApiClient")
            .field("did", &self.state.as_ref().map(|s| &s.did))
            .field("public_service", &self.public_service)
            .finish_non_exhaustive()
    }
}

impl<C> AuthenticatedApiClient<C> {
    pub fn new(
        http: C,
        repo: CredentialRepository,
        state: Option<ClientRuntimeState>,
        public_service: Url,
    ) -> Self {
        Self {
            http,
            repo,
            state,
            public_service,
            tasks: TaskTracker::new(),
        }
    }

    pub fn state(&self) -> Option<&ClientRuntimeState> {
        self.state.as_ref()
    }

    pub fn user(&self) -> Option<User> {
        self.state.as_ref().map(ClientRuntimeState::user)
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.is_some()
    }

    /// Base URL requests are built against
    pub fn service(&self) -> &Url {
        self.state
            .as_ref()
            .map_or(&self.public_service, |s| &s.service_endpoint)
    }

    /// Wait for all pending credential writes.
    pub async fn flush(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}

impl<C: HttpClient> AuthenticatedApiClient<C> {
    /// Send a request built against the current service endpoint.
    ///
    /// `build` may be called twice when the server rotates the DPoP nonce.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(authenticated = self.state.is_some())))]
    pub async fn send<F>(&mut self, mut build: F) -> Result<Response<Vec<u8>>>
    where
        F: FnMut(&Url) -> core::result::Result<Request<Vec<u8>>, http::Error>,
    {
        let Some(state) = self.state.as_mut() else {
            let request = build(&self.public_service)?;
            return self
                .http
                .send_http(request)
                .await
                .map_err(|e| OAuthError::from(TransportError::from_client_error(e)));
        };

        let service = state.service_endpoint.clone();
        let opts = DpopOptions::new(&state.keypair)
            .access_token(&state.access_token)
            .nonce(&state.dpop_nonce)
            .build();
        let outcome = dpop_send(&self.http, || build(&service), opts).await;
        let nonce = match &outcome {
            Ok((nonce, _)) => nonce.clone(),
            Err(e) => e.issued_nonce().cloned(),
        };

        if let Some(nonce) = nonce.filter(|n| *n != state.dpop_nonce) {
            #[cfg(feature = "tracing")]
            tracing::debug!(did = %state.did, "DPoP nonce rotated");
            state.dpop_nonce = nonce;
            let repo = self.repo.clone();
            let did = state.did.clone();
            let record = state.to_record();
            self.tasks.spawn(async move {
                if let Err(_e) = repo.put_record(&did, &record).await {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(did = %did, error = %_e, "failed to persist rotated DPoP nonce");
                }
            });
        }
        let (_, response) = outcome?;
        Ok(response)
    }

    /// XRPC query (`GET /xrpc/<nsid>?<params>`) returning the JSON body
    pub async fn xrpc_query<P: Serialize>(&mut self, nsid: &str, params: &P) -> Result<Value> {
        let query = serde_html_form::to_string(params)?;
        let response = self
            .send(|base| {
                let mut uri = xrpc_url(base, nsid);
                if !query.is_empty() {
                    uri.push('?');
                    uri.push_str(&query);
                }
                Request::builder()
                    .method(Method::GET)
                    .uri(uri)
                    .header(ACCEPT, "application/json")
                    .body(Vec::new())
            })
            .await?;
        json_body(nsid, response)
    }

    /// XRPC procedure (`POST /xrpc/<nsid>` with a JSON body) returning the JSON body
    pub async fn xrpc_procedure<B: Serialize>(&mut self, nsid: &str, body: &B) -> Result<Value> {
        let body = serde_json::to_vec(body)?;
        let response = self
            .send(|base| {
                Request::builder()
                    .method(Method::POST)
                    .uri(xrpc_url(base, nsid))
                    .header(ACCEPT, "application/json")
                    .header(CONTENT_TYPE, "application/json")
                    .body(body.clone())
            })
            .await?;
        json_body(nsid, response)
    }
}

fn xrpc_url(base: &Url, nsid: &str) -> String {
    format!("{}/xrpc/{nsid}", base.as_str().trim_end_matches('/'))
}

fn json_body(nsid: &str, response: Response<Vec<u8>>) -> Result<Value> {
    if !response.status().is_success() {
        return Err(OAuthError::http_status(nsid, response.status(), response.body()));
    }
    if response.body().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(response.body())?)
}
