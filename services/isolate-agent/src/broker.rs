//! Configuration broker client.
//!
//! The broker holds the configuration document of each isolate until the
//! isolate has fetched it:
//! - `GET {broker}/configuration/{isolate}` returns the document
//! - `DELETE {broker}/configuration/{isolate}` discards it

use std::time::Duration;

use reqwest::{StatusCode, Url};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid broker url {0}")]
    InvalidUrl(String),

    #[error("unsupported broker url scheme {0}, only http is supported")]
    UnsupportedScheme(String),

    #[error("broker answered with status {0}")]
    Status(u16),

    #[error("broker request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl BrokerError {
    /// HTTP status carried by a [`BrokerError::Status`].
    pub fn status(&self) -> Option<u16> {
        match self {
            BrokerError::Status(code) => Some(*code),
            _ => None,
        }
    }
}

/// HTTP client for the configuration broker.
pub struct BrokerClient {
    client: reqwest::Client,
    base: Url,
}

impl BrokerClient {
    pub fn new(broker_url: &str) -> Result<Self, BrokerError> {
        let base = Url::parse(broker_url).map_err(|_| BrokerError::InvalidUrl(broker_url.to_string()))?;
        if base.scheme() != "http" {
            return Err(BrokerError::UnsupportedScheme(base.scheme().to_string()));
        }
        if base.host_str().is_none() {
            return Err(BrokerError::InvalidUrl(broker_url.to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { client, base })
    }

    /// Port the broker is reached on; 80 unless the URL names one.
    pub fn port(&self) -> u16 {
        self.base.port_or_known_default().unwrap_or(80)
    }

    fn configuration_url(&self, isolate: &str) -> String {
        format!(
            "{}/configuration/{}",
            self.base.as_str().trim_end_matches('/'),
            isolate
        )
    }

    /// Fetches the configuration document of an isolate.
    pub async fn fetch_configuration(&self, isolate: &str) -> Result<serde_json::Value, BrokerError> {
        let url = self.configuration_url(isolate);
        debug!(url = %url, "Fetching isolate configuration");

        let response = self.client.get(&url).send().await?;
        if response.status() != StatusCode::OK {
            warn!(isolate_id = %isolate, status = %response.status(), "Broker refused configuration fetch");
            return Err(BrokerError::Status(response.status().as_u16()));
        }

        Ok(response.json().await?)
    }

    /// Removes the configuration document of an isolate from the broker.
    pub async fn delete_configuration(&self, isolate: &str) -> Result<(), BrokerError> {
        let url = self.configuration_url(isolate);
        debug!(url = %url, "Deleting isolate configuration");

        let response = self.client.delete(&url).send().await?;
        if response.status() != StatusCode::OK {
            warn!(isolate_id = %isolate, status = %response.status(), "Broker refused configuration delete");
            return Err(BrokerError::Status(response.status().as_u16()));
        }

        Ok(())
    }
}
