use std::time::Duration;

use protoflare_common::{AtIdentifier, Did, HttpClient};
use protoflare_identity::IdentityResolver;
use smol_str::SmolStr;
use url::Url;

use crate::atproto::ClientConfig;
use crate::error::{OAuthError, Result};
use crate::keys::DpopKey;
use crate::request::{exchange_code, par, refresh};
use crate::session::{AuthenticatedApiClient, ClientRuntimeState, PUBLIC_SERVICE, User};
use crate::store::{CredentialRecord, CredentialRepository, PendingAuthorization};
use crate::types::{
    CallbackParams, OAuthClientMetadata, OAuthTokenResponse, ParParameters,
    RefreshRequestParameters, TokenGrantType, TokenRequestParameters,
};
use crate::utils::{generate_state, generate_verifier, pkce_challenge};

/// Drives the authorization code flow and hands out API clients.
///
/// ```no_run
/// # use protoflare_oauth::{ClientConfig, CredentialRepository, OAuthClient};
/// # use protoflare_common::{AtIdentifier, MemoryStore};
/// # use protoflare_identity::ProtoflareResolver;
/// # async fn example() -> protoflare_oauth::Result<()> {
/// let config = ClientConfig::new("http://localhost:8787".parse()?).build();
/// let client = OAuthClient::new(
///     reqwest::Client::new(),
///     ProtoflareResolver::default(),
///     CredentialRepository::new(MemoryStore::new()),
///     config,
/// );
/// let ident = AtIdentifier::new("alice.bsky.social").map_err(protoflare_identity::IdentityError::from)?;
/// let url = client.authorize(&ident).await?;
/// println!("open {url}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct OAuthClient<C, R> {
    http: C,
    resolver: R,
    repo: CredentialRepository,
    config: ClientConfig,
    public_service: Url,
}

impl<C, R> OAuthClient<C, R> {
    pub fn new(http: C, resolver: R, repo: CredentialRepository, config: ClientConfig) -> Self {
        Self {
            http,
            resolver,
            repo,
            config,
            public_service: default_public_service(),
        }
    }

    /// Use a different service for unauthenticated calls
    pub fn with_public_service(mut self, url: Url) -> Self {
        self.public_service = url;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn repository(&self) -> &CredentialRepository {
        &self.repo
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    pub fn client_id(&self) -> SmolStr {
        self.config.client_id()
    }

    pub fn redirect_uri(&self) -> Url {
        self.config.redirect_uri()
    }

    pub fn client_metadata(&self) -> OAuthClientMetadata {
        self.config.client_metadata()
    }

    /// Forget everything stored for `did`.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(did = %did)))]
    pub async fn logout(&self, did: &Did) -> Result<()> {
        self.repo
            .delete_identity(did)
            .await
            .map_err(OAuthError::storage)
    }
}

impl<C: Clone, R> OAuthClient<C, R> {
    /// API client without credentials, talking to the public service
    pub fn public_client(&self) -> AuthenticatedApiClient<C> {
        AuthenticatedApiClient::new(
            self.http.clone(),
            self.repo.clone(),
            None,
            self.public_service.clone(),
        )
    }

    fn session(&self, state: ClientRuntimeState) -> (User, AuthenticatedApiClient<C>) {
        let user = state.user();
        let client = AuthenticatedApiClient::new(
            self.http.clone(),
            self.repo.clone(),
            Some(state),
            self.public_service.clone(),
        );
        (user, client)
    }
}

impl<C, R> OAuthClient<C, R>
where
    C: HttpClient + Clone + Sync,
    R: IdentityResolver + Sync,
{
    /// Start a login for a handle or DID.
    ///
    /// Returns the URL to send the user to. The pending authorization is
    /// stored only once the authorization server accepted the request.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(ident = %ident)))]
    pub async fn authorize(&self, ident: &AtIdentifier) -> Result<Url> {
        let identity = self.resolver.resolve_identity(ident).await?;
        let auth_server = identity.endpoints.authorization_server.clone();

        let state = generate_state();
        let verifier = generate_verifier();
        let challenge = pkce_challenge(&verifier);
        let login_hint = ident.to_string();
        let metadata = self.client_metadata();
        let params = ParParameters {
            response_type: "code",
            code_challenge: &challenge,
            code_challenge_method: "S256",
            state: &state,
            login_hint: &login_hint,
        };
        let (par_response, nonce) = par(&self.http, &auth_server, &metadata, params).await?;

        let pending = PendingAuthorization {
            auth_server: auth_server.clone(),
            did: identity.did.clone(),
            dpop_nonce: nonce,
            handle: identity.display_handle().into(),
            service_endpoint: identity.endpoints.pds.clone(),
            verifier,
        };
        let ttl = Duration::from_secs(par_response.expires_in());
        self.repo.put_pending(&state, &pending, ttl).await?;

        let mut url = auth_server.join("/oauth/authorize")?;
        url.query_pairs_mut()
            .append_pair("client_id", &metadata.client_id)
            .append_pair("request_uri", &par_response.request_uri);
        Ok(url)
    }

    /// Finish a login with the parameters the authorization server redirected back with.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all))]
    pub async fn exchange(
        &self,
        params: &CallbackParams,
    ) -> Result<(User, AuthenticatedApiClient<C>)> {
        let Some(pending) = self.repo.take_pending(&params.state).await else {
            return Err(OAuthError::state("unable to find state"));
        };
        if !same_issuer(&pending.auth_server, &params.iss) {
            return Err(OAuthError::state("invalid issuer").with_help(smol_str::format_smolstr!(
                "expected {}, got {}",
                pending.auth_server,
                params.iss
            )));
        }

        let keypair = DpopKey::generate();
        let client_id = self.client_id();
        let redirect_uri = self.redirect_uri();
        let token_params = TokenRequestParameters {
            client_id: &client_id,
            code: &params.code,
            code_verifier: &pending.verifier,
            grant_type: TokenGrantType::AuthorizationCode,
            redirect_uri: redirect_uri.as_str(),
        };
        let (nonce, token) = exchange_code(
            &self.http,
            &pending.auth_server,
            token_params,
            &keypair,
            &pending.dpop_nonce,
        )
        .await?;
        if let Some(sub) = token.sub.as_deref() {
            if sub != pending.did.as_str() {
                return Err(OAuthError::state(smol_str::format_smolstr!(
                    "token issued for {sub}, expected {}",
                    pending.did
                )));
            }
        }

        let state = ClientRuntimeState {
            access_token: token.access_token.clone(),
            auth_server: pending.auth_server,
            did: pending.did,
            dpop_nonce: nonce,
            handle: pending.handle,
            keypair,
            service_endpoint: pending.service_endpoint,
            refresh_token: token.refresh_token.clone(),
        };
        self.persist(&state, &token).await?;
        #[cfg(feature = "tracing")]
        tracing::debug!(did = %state.did, "authorization complete");
        Ok(self.session(state))
    }

    /// Resume the session stored for `did`, refreshing the access token when it has expired.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(did = %did)))]
    pub async fn restore(&self, did: &Did) -> Result<(User, AuthenticatedApiClient<C>)> {
        let (record, access_token) = futures::join!(
            self.repo.get_record(did),
            self.repo.get_access_token(did)
        );
        let Some(record) = record? else {
            return Err(OAuthError::credential("unable to find user state"));
        };
        let keypair = DpopKey::from_portable(&record.keys)?;

        if let Some(access_token) = access_token? {
            let state = runtime_state(did, record, keypair, access_token);
            return Ok(self.session(state));
        }
        let state = self.refresh(did, record, keypair).await?;
        Ok(self.session(state))
    }

    async fn refresh(
        &self,
        did: &Did,
        record: CredentialRecord,
        keypair: DpopKey,
    ) -> Result<ClientRuntimeState> {
        let Some(refresh_token) = record.refresh_token.as_deref() else {
            return Err(OAuthError::credential("no refresh token available"));
        };
        let client_id = self.client_id();
        let params = RefreshRequestParameters {
            client_id: &client_id,
            grant_type: TokenGrantType::RefreshToken,
            refresh_token,
        };
        let (nonce, token) = refresh(
            &self.http,
            &record.auth_server,
            params,
            &keypair,
            &record.dpop_nonce,
        )
        .await?;

        let mut state = runtime_state(did, record, keypair, token.access_token.clone());
        state.dpop_nonce = nonce;
        state.refresh_token = token.refresh_token.clone();
        self.persist(&state, &token).await?;
        #[cfg(feature = "tracing")]
        tracing::debug!(did = %did, "access token refreshed");
        Ok(state)
    }

    async fn persist(&self, state: &ClientRuntimeState, token: &OAuthTokenResponse) -> Result<()> {
        let ttl = token.expires_in.map(Duration::from_secs);
        self.repo
            .put_access_token(&state.did, &token.access_token, ttl)
            .await?;
        self.repo.put_record(&state.did, &state.to_record()).await?;
        Ok(())
    }
}

fn runtime_state(
    did: &Did,
    record: CredentialRecord,
    keypair: DpopKey,
    access_token: SmolStr,
) -> ClientRuntimeState {
    ClientRuntimeState {
        access_token,
        auth_server: record.auth_server,
        did: did.clone(),
        dpop_nonce: record.dpop_nonce,
        handle: record.handle,
        keypair,
        service_endpoint: record.service_endpoint,
        refresh_token: record.refresh_token,
    }
}

fn default_public_service() -> Url {
    Url::parse(PUBLIC_SERVICE).expect("valid url")
}

/// Compare the `iss` callback parameter against the server the flow started with.
///
/// Scheme, host, effective port and path must agree; a trailing slash on the
/// path is ignored.
fn same_issuer(expected: &Url, issuer: &str) -> bool {
    let Ok(issuer) = Url::parse(issuer) else {
        return false;
    };
    expected.scheme() == issuer.scheme()
        && expected.host_str() == issuer.host_str()
        && expected.port_or_known_default() == issuer.port_or_known_default()
        && expected.path().trim_end_matches('/') == issuer.path().trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issuer_comparison() {
        let expected = Url::parse("https://auth.example.com").unwrap();
        assert!(same_issuer(&expected, "https://auth.example.com"));
        assert!(same_issuer(&expected, "https://auth.example.com/"));
        assert!(same_issuer(&expected, "https://auth.example.com:443"));
        assert!(!same_issuer(&expected, "http://auth.example.com"));
        assert!(!same_issuer(&expected, "https://evil.example.com"));
        assert!(!same_issuer(&expected, "https://auth.example.com:8443"));
        assert!(!same_issuer(&expected, "https://auth.example.com/tenant"));
        assert!(!same_issuer(&expected, "not a url"));

        let with_path = Url::parse("https://auth.example.com/tenant/").unwrap();
        assert!(same_issuer(&with_path, "https://auth.example.com/tenant"));
    }
}
