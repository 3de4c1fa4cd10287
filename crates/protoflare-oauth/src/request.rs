use http::header::{ACCEPT, CONTENT_TYPE};
use http::{Method, Request, Response};
use protoflare_common::error::TransportError;
use protoflare_common::http_client::HttpClient;
use smol_str::SmolStr;
use url::Url;

use crate::dpop::{DpopOptions, dpop_send, is_nonce_challenge, response_nonce};
use crate::error::{OAuthError, Result};
use crate::keys::DpopKey;
use crate::types::{
    OAuthClientMetadata, OAuthErrorResponse, OAuthParResponse, OAuthTokenResponse, ParParameters,
    RefreshRequestParameters, TokenRequestParameters,
};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

fn form_request(url: &Url, body: &str) -> core::result::Result<Request<Vec<u8>>, http::Error> {
    Request::builder()
        .method(Method::POST)
        .uri(url.as_str())
        .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
        .header(ACCEPT, "application/json")
        .body(body.as_bytes().to_vec())
}

/// Pushed authorization request: every client metadata field followed by the
/// authorization parameters. Sent without DPoP.
///
/// Returns the PAR response and the nonce the server issued with it.
#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(auth_server = %auth_server)))]
pub async fn par<C: HttpClient>(
    client: &C,
    auth_server: &Url,
    metadata: &OAuthClientMetadata,
    params: ParParameters<'_>,
) -> Result<(OAuthParResponse, SmolStr)> {
    let url = auth_server.join("/oauth/par")?;
    let mut body = serde_html_form::to_string(metadata.form_pairs()?)?;
    body.push('&');
    body.push_str(&serde_html_form::to_string(params)?);

    let response = client
        .send_http(form_request(&url, &body)?)
        .await
        .map_err(|e| OAuthError::from(TransportError::from_client_error(e)))?;
    if !response.status().is_success() {
        return Err(OAuthError::http_status("pushed authorization request", response.status(), response.body()));
    }
    let par: OAuthParResponse = serde_json::from_slice(response.body())
        .map_err(|e| OAuthError::protocol("unparseable PAR response").with_source(e))?;
    let nonce = response_nonce(&response)
        .ok_or_else(|| OAuthError::nonce("PAR response carried no DPoP-Nonce"))?;
    Ok((par, nonce))
}

async fn token_request<C: HttpClient>(
    client: &C,
    auth_server: &Url,
    body: String,
    key: &DpopKey,
    nonce: &str,
    retry: bool,
) -> Result<Response<Vec<u8>>> {
    let url = auth_server.join("/oauth/token")?;
    let opts = DpopOptions::new(key)
        .nonce(nonce)
        .retry_on_nonce_challenge(retry)
        .build();
    let (_, response) = dpop_send(client, || form_request(&url, &body), opts).await?;
    Ok(response)
}

// Token responses must carry their own nonce; the one we sent is not reused.
fn issued_nonce(response: &Response<Vec<u8>>) -> Result<SmolStr> {
    response_nonce(response).ok_or_else(|| OAuthError::nonce("token response carried no DPoP-Nonce"))
}

fn parse_token(response: &Response<Vec<u8>>) -> Result<OAuthTokenResponse> {
    serde_json::from_slice(response.body())
        .map_err(|e| OAuthError::protocol("unparseable token response").with_source(e))
}

/// Exchange an authorization code for tokens.
///
/// Nonce challenges are not retried here: the code is single-use, so a second
/// attempt could only fail. A challenge surfaces as a nonce error.
#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(auth_server = %auth_server)))]
pub async fn exchange_code<C: HttpClient>(
    client: &C,
    auth_server: &Url,
    params: TokenRequestParameters<'_>,
    key: &DpopKey,
    nonce: &str,
) -> Result<(SmolStr, OAuthTokenResponse)> {
    let body = serde_html_form::to_string(params)?;
    let response = token_request(client, auth_server, body, key, nonce, false).await?;
    if is_nonce_challenge(&response) {
        return Err(OAuthError::nonce("token endpoint rejected the DPoP nonce during code exchange"));
    }
    let next_nonce = issued_nonce(&response)?;
    if !response.status().is_success() {
        return Err(OAuthError::http_status("code exchange", response.status(), response.body()));
    }
    Ok((next_nonce, parse_token(&response)?))
}

/// Trade a refresh token for a new access token
#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(auth_server = %auth_server)))]
pub async fn refresh<C: HttpClient>(
    client: &C,
    auth_server: &Url,
    params: RefreshRequestParameters<'_>,
    key: &DpopKey,
    nonce: &str,
) -> Result<(SmolStr, OAuthTokenResponse)> {
    let body = serde_html_form::to_string(params)?;
    let response = token_request(client, auth_server, body, key, nonce, true).await?;
    if !response.status().is_success() {
        if let Ok(err) = serde_json::from_slice::<OAuthErrorResponse>(response.body()) {
            if err.is_invalid_grant() {
                let mut error = OAuthError::credential("refresh token was rejected");
                if let Some(description) = err.error_description {
                    error = error.with_help(description);
                }
                return Err(error);
            }
        }
        return Err(OAuthError::http_status("token refresh", response.status(), response.body()));
    }
    let next_nonce = issued_nonce(&response)?;
    Ok((next_nonce, parse_token(&response)?))
}
