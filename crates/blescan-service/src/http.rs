//! HTTP transport: POSTs summary records as JSON to the backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use blescan_types::SummaryRecord;

use crate::delivery::Transport;
use crate::error::DeliveryError;

/// Delivers [`SummaryRecord`]s to a single backend URL.
///
/// A delivery only counts when the backend answers `200 OK`. The probe is a
/// plain `GET` on the same URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    url: String,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, DeliveryError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self::with_client(url, client))
    }

    /// Create a transport with a custom reqwest Client.
    pub fn with_client(url: impl Into<String>, client: Client) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    type Message = SummaryRecord;

    fn name(&self) -> &str {
        "http"
    }

    async fn deliver(&self, record: &SummaryRecord) -> Result<(), DeliveryError> {
        let response = self.client.post(&self.url).json(record).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(DeliveryError::Status(status.as_u16()));
        }
        debug!("Posted summary {} to {}", record.timestamp, self.url);
        Ok(())
    }

    async fn probe(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                debug!("Probe of {} failed: {}", self.url, e);
                false
            }
        }
    }
}
