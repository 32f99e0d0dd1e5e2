//! Content-addressed anchoring of evidence footage

use crate::config::{AnchorConfig, PINATA_API_KEY_ENV, PINATA_SECRET_API_KEY_ENV};
use crate::error::{AnomalyError, Result};
use crate::types::ContentIdentifier;
use reqwest::blocking::{multipart, Client};
use serde::Deserialize;
use std::time::Duration;

/// Pins bytes to content-addressed storage
pub trait AnchorService: Send + Sync {
    /// Upload `bytes` under `name`; fails with `AnchorUnavailable`
    fn anchor(&self, name: &str, bytes: &[u8]) -> Result<ContentIdentifier>;

    /// Public URL for an anchored identifier
    fn gateway_url(&self, cid: &ContentIdentifier) -> String;
}

#[derive(Debug, Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

/// Pinata pinning API over blocking HTTP
pub struct PinataAnchor {
    http: Client,
    endpoint: String,
    gateway: String,
    api_key: String,
    secret_key: String,
}

impl PinataAnchor {
    pub fn new(config: &AnchorConfig, api_key: String, secret_key: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AnomalyError::config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            gateway: config.gateway.clone(),
            api_key,
            secret_key,
        })
    }

    /// Credentials from `PINATA_API_KEY` / `PINATA_SECRET_API_KEY`
    pub fn from_env(config: &AnchorConfig) -> Result<Self> {
        let api_key = std::env::var(PINATA_API_KEY_ENV)
            .map_err(|_| AnomalyError::config(format!("{} is not set", PINATA_API_KEY_ENV)))?;
        let secret_key = std::env::var(PINATA_SECRET_API_KEY_ENV).map_err(|_| {
            AnomalyError::config(format!("{} is not set", PINATA_SECRET_API_KEY_ENV))
        })?;
        Self::new(config, api_key, secret_key)
    }
}

impl AnchorService for PinataAnchor {
    fn anchor(&self, name: &str, bytes: &[u8]) -> Result<ContentIdentifier> {
        let part = multipart::Part::bytes(bytes.to_vec()).file_name(name.to_string());
        let form = multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(&self.endpoint)
            .header("pinata_api_key", &self.api_key)
            .header("pinata_secret_api_key", &self.secret_key)
            .multipart(form)
            .send()
            .map_err(|e| AnomalyError::anchor_unavailable(format!("upload failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AnomalyError::anchor_unavailable(format!(
                "pinning service returned {}: {}",
                status, body
            )));
        }

        let pinned: PinResponse = response
            .json()
            .map_err(|e| AnomalyError::anchor_unavailable(format!("unreadable pin response: {}", e)))?;

        log::info!("Pinned {} ({} bytes) as {}", name, bytes.len(), pinned.ipfs_hash);
        Ok(ContentIdentifier(pinned.ipfs_hash))
    }

    fn gateway_url(&self, cid: &ContentIdentifier) -> String {
        cid.gateway_url(&self.gateway)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_response_field_name() {
        let parsed: PinResponse =
            serde_json::from_str(r#"{"IpfsHash":"QmAbc","PinSize":10,"Timestamp":"t"}"#).unwrap();
        assert_eq!(parsed.ipfs_hash, "QmAbc");
    }

    #[test]
    fn test_unreachable_endpoint_is_anchor_unavailable() {
        let config = AnchorConfig {
            endpoint: "http://127.0.0.1:9/pinning/pinFileToIPFS".to_string(),
            gateway: "https://gw.example".to_string(),
            timeout_secs: 2,
        };
        let anchor = PinataAnchor::new(&config, "key".into(), "secret".into()).unwrap();
        let err = anchor.anchor("clip.mp4", b"bytes").unwrap_err();
        assert!(err.is_transient());
        assert_eq!(
            anchor.gateway_url(&ContentIdentifier("QmAbc".into())),
            "https://gw.example/ipfs/QmAbc"
        );
    }
}
