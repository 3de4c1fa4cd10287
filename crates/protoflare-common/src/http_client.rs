use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// HTTP client trait for sending raw HTTP requests.
///
/// Responses are fully buffered; implementations must read the whole body
/// before returning so callers never hold an open connection.
#[trait_variant::make(Send)]
pub trait HttpClient {
    /// Error type returned by the HTTP client
    type Error: std::error::Error + Display + Send + Sync + 'static;

    /// Send an HTTP request and return the response.
    fn send_http(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> impl Future<Output = core::result::Result<http::Response<Vec<u8>>, Self::Error>>;
}

#[cfg(feature = "reqwest-client")]
impl HttpClient for reqwest::Client {
    type Error = TransportError;

    async fn send_http(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> core::result::Result<http::Response<Vec<u8>>, Self::Error> {
        let (parts, body) = request.into_parts();

        let mut req = self.request(parts.method, parts.uri.to_string()).body(body);
        for (name, value) in parts.headers.iter() {
            req = req.header(name.as_str(), value.as_bytes());
        }

        let resp = req.send().await?;

        let mut builder = http::Response::builder().status(resp.status());
        for (name, value) in resp.headers().iter() {
            builder = builder.header(name.as_str(), value.as_bytes());
        }

        let body = resp.bytes().await?.to_vec();
        Ok(builder.body(body)?)
    }
}

impl<T: HttpClient + Sync> HttpClient for Arc<T> {
    type Error = T::Error;

    fn send_http(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> impl Future<Output = core::result::Result<http::Response<Vec<u8>>, Self::Error>> + Send
    {
        self.as_ref().send_http(request)
    }
}

/// An [`HttpClient`] whose requests abort once a [`CancellationToken`] fires.
///
/// Cancelled requests fail with [`TransportError::Cancelled`]; any other
/// failure of the wrapped client is converted with
/// [`TransportError::from_client_error`].
#[derive(Debug, Clone)]
pub struct Cancellable<C> {
    inner: C,
    token: CancellationToken,
}

impl<C> Cancellable<C> {
    /// Wrap `inner` so its requests observe `token`
    pub fn new(inner: C, token: CancellationToken) -> Self {
        Self { inner, token }
    }

    /// The token requests are bound to
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// The wrapped client
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: HttpClient + Sync> HttpClient for Cancellable<C> {
    type Error = TransportError;

    async fn send_http(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> core::result::Result<http::Response<Vec<u8>>, Self::Error> {
        if self.token.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(TransportError::Cancelled),
            res = self.inner.send_http(request) => res.map_err(TransportError::from_client_error),
        }
    }
}

/// Convenience adapters available on every [`HttpClient`]
pub trait HttpClientExt: HttpClient + Sized {
    /// Bind every request made through the returned client to `token`
    fn with_cancellation(self, token: CancellationToken) -> Cancellable<Self> {
        Cancellable::new(self, token)
    }
}

impl<T: HttpClient> HttpClientExt for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct SlowClient;

    impl HttpClient for SlowClient {
        type Error = std::convert::Infallible;

        async fn send_http(
            &self,
            _request: http::Request<Vec<u8>>,
        ) -> Result<http::Response<Vec<u8>>, Self::Error> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(http::Response::builder().status(200).body(Vec::new()).unwrap())
        }
    }

    fn request() -> http::Request<Vec<u8>> {
        http::Request::builder()
            .uri("https://example.com/")
            .body(Vec::new())
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_in_flight_request() {
        let token = CancellationToken::new();
        let client = SlowClient.with_cancellation(token.clone());
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });
        let err = client.send_http(request()).await.unwrap_err();
        assert!(err.is_cancelled());
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn already_cancelled_token_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();
        let client = SlowClient.with_cancellation(token);
        let err = client.send_http(request()).await.unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
    }
}
