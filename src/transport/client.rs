//! HTTP implementation of `EventTransport`

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{Event, EventTransport};
use crate::error::TransportError;

#[derive(Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Client with a per-call timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Undelivered(e.to_string()))?;
        Ok(Self::new(client))
    }

    async fn post(&self, target: &str, event: &Event) -> Result<reqwest::Response, TransportError> {
        let (headers, body) = event
            .to_http()
            .map_err(|e| TransportError::Undelivered(e.to_string()))?;

        debug!("Sending {} event {} to {}", event.event_type, event.id, target);
        let response = self
            .client
            .post(target)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::Undelivered(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Rejected(status.as_u16()));
        }
        Ok(response)
    }
}

#[async_trait]
impl EventTransport for HttpTransport {
    async fn request(&self, target: &str, event: Event) -> Result<Option<Event>, TransportError> {
        let response = self.post(target, &event).await?;
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Undelivered(e.to_string()))?;

        if !Event::present_in(&headers, &body) {
            return Ok(None);
        }
        Event::from_http(&headers, &body)
            .map(Some)
            .map_err(|e| TransportError::MalformedReply(e.to_string()))
    }

    async fn send(&self, target: &str, event: Event) -> Result<(), TransportError> {
        self.post(target, &event).await.map(|_| ())
    }
}
