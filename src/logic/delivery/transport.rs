//! Transport seam between the deliverer and the network

use async_trait::async_trait;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};

use super::payload::OutboundRequest;
use super::types::DeliveryError;

/// Sends one encoded request. Any 2xx is success.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<(), DeliveryError>;

    /// Liveness probe; transports without one report healthy
    async fn health(&self, _url: &str) -> Result<(), DeliveryError> {
        Ok(())
    }
}

/// reqwest-backed HTTP transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http_client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str) -> Result<Self, DeliveryError> {
        let http_client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| DeliveryError::Network(e.to_string()))?;
        Ok(Self { http_client })
    }

    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: OutboundRequest) -> Result<(), DeliveryError> {
        let mut builder = self
            .http_client
            .post(&request.url)
            .header(CONTENT_TYPE, "application/json");
        if request.gzip {
            builder = builder.header(CONTENT_ENCODING, "gzip");
        }

        let response = builder
            .body(request.body)
            .send()
            .await
            .map_err(|e| DeliveryError::Network(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status(response.status().as_u16()))
        }
    }

    async fn health(&self, url: &str) -> Result<(), DeliveryError> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| DeliveryError::Network(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status(response.status().as_u16()))
        }
    }
}
