use std::{sync::Arc, time::SystemTime};

use crate::{error::Result, request::HttpRequest, response::HttpResponse};

/// A response paired with when its request was sent and when its headers
/// arrived, both wall-clock readings
#[derive(Debug, Clone)]
pub struct RoundTrip {
    /// The origin's response
    pub response: HttpResponse,
    /// When the request was sent
    pub request_time: SystemTime,
    /// When the response headers were received
    pub response_time: SystemTime,
}

/// The transport the cache fetches through.
///
/// Requests handed to `round_trip` already have hop-by-hop headers removed
/// and validators attached; implementations only move bytes and record the
/// two timestamps.
#[async_trait::async_trait]
pub trait Upstream: Send + Sync + 'static {
    /// Forwards the request to the origin and returns the response together
    /// with its timing
    async fn round_trip(&self, request: &HttpRequest) -> Result<RoundTrip>;
}

#[async_trait::async_trait]
impl<T: Upstream> Upstream for Arc<T> {
    async fn round_trip(&self, request: &HttpRequest) -> Result<RoundTrip> {
        (**self).round_trip(request).await
    }
}

#[cfg(feature = "client-reqwest")]
mod reqwest_client {
    use std::time::{Duration, SystemTime};

    use crate::{
        error::{CacheError, Result},
        request::HttpRequest,
        response::HttpResponse,
    };

    use super::RoundTrip;

    /// An [`super::Upstream`] backed by a [`reqwest::Client`]
    #[derive(Debug, Clone)]
    pub struct ReqwestUpstream {
        client: reqwest::Client,
        deadline: Option<Duration>,
    }

    impl ReqwestUpstream {
        /// Wraps a client with no deadline
        #[must_use]
        pub fn new(client: reqwest::Client) -> Self {
            Self { client, deadline: None }
        }

        /// Fails round trips with [`CacheError::UpstreamTimeout`] once
        /// `deadline` elapses
        #[must_use]
        pub fn with_deadline(mut self, deadline: Duration) -> Self {
            self.deadline = Some(deadline);
            self
        }
    }

    #[async_trait::async_trait]
    impl super::Upstream for ReqwestUpstream {
        async fn round_trip(
            &self,
            request: &HttpRequest,
        ) -> Result<RoundTrip> {
            let outbound = self
                .client
                .request(request.method.clone(), request.url.clone())
                .headers(request.headers.to_header_map())
                .body(request.body.clone());

            let request_time = SystemTime::now();
            let send = outbound.send();
            let sent = match self.deadline {
                Some(deadline) => tokio::time::timeout(deadline, send)
                    .await
                    .map_err(|_| CacheError::UpstreamTimeout)?,
                None => send.await,
            };
            let upstream_response = sent.map_err(|err| {
                if err.is_timeout() {
                    CacheError::UpstreamTimeout
                } else {
                    CacheError::UpstreamUnreachable(err.to_string())
                }
            })?;
            let response_time = SystemTime::now();

            let status = upstream_response.status().as_u16();
            let version = upstream_response.version().try_into()?;
            let headers = (upstream_response.headers()).into();
            let declared = upstream_response.content_length();
            let body = upstream_response
                .bytes()
                .await
                .map_err(|_| CacheError::BodyTruncated)?
                .to_vec();
            let bodyless = request.method == http::Method::HEAD
                || status == 204
                || status == 304
                || (100..200).contains(&status);
            if !bodyless && declared.is_some_and(|n| (body.len() as u64) < n)
            {
                return Err(CacheError::BodyTruncated);
            }

            Ok(RoundTrip {
                response: HttpResponse {
                    body,
                    headers,
                    status,
                    url: request.url.clone(),
                    version,
                },
                request_time,
                response_time,
            })
        }
    }
}

#[cfg(feature = "client-reqwest")]
pub use reqwest_client::ReqwestUpstream;
