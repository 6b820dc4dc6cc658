use std::time::Duration;

use async_stream::stream;
use futures::Stream;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Method};
use tokio::time::{MissedTickBehavior, interval};
use url::Url;

use super::types::HealthResponse;
use crate::Result;
use crate::error::Error;

/// HTTP client for the backend health endpoint.
///
/// # Example
///
/// ```no_run
/// use agent_realtime::health::Client;
///
/// # async fn run() -> agent_realtime::Result<()> {
/// let client = Client::new("http://localhost:8000")?;
/// let health = client.check().await?;
/// println!("{:?}", health.status);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Client {
    host: Url,
    client: ReqwestClient,
}

impl Client {
    pub fn new(host: &str) -> Result<Client> {
        let mut headers = HeaderMap::new();

        headers.insert("User-Agent", HeaderValue::from_static("agent_realtime"));
        headers.insert("Accept", HeaderValue::from_static("*/*"));
        let client = ReqwestClient::builder().default_headers(headers).build()?;

        Ok(Self {
            host: Url::parse(host)?,
            client,
        })
    }

    #[must_use]
    pub fn host(&self) -> &Url {
        &self.host
    }

    /// `GET {host}/health`.
    ///
    /// Fails on transport errors and non-success status codes.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip(self), fields(host = %self.host, status_code))
    )]
    pub async fn check(&self) -> Result<HealthResponse> {
        let url = self.host.join("health")?;
        let request = self.client.request(Method::GET, url.clone()).build()?;

        let response = self.client.execute(request).await?;
        let status_code = response.status();

        #[cfg(feature = "tracing")]
        tracing::Span::current().record("status_code", status_code.as_u16());

        if !status_code.is_success() {
            let message = response.text().await.unwrap_or_default();

            #[cfg(feature = "tracing")]
            tracing::warn!(status = %status_code, %message, "Health check failed");

            return Err(Error::status(
                status_code,
                Method::GET,
                url.path().to_owned(),
                message,
            ));
        }

        HealthResponse::from_body(&response.text().await?)
    }

    /// Check now, then once every `every`, for as long as the stream is polled.
    pub fn poll(&self, every: Duration) -> impl Stream<Item = Result<HealthResponse>> + '_ {
        stream! {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                yield self.check().await;
            }
        }
    }
}
