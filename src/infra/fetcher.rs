use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::application::providers::{PageFetcher, ProviderError};
use crate::infra::error::InfraError;

/// Plain HTTP GETs against the public site, used for cache warm-up.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_document(&self, url: &str) -> Result<String, ProviderError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(ProviderError::transport)?;
        let status = response.status();
        let body = response.text().await.map_err(ProviderError::transport)?;
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    async fn touch(&self, url: &str) -> Result<u16, ProviderError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(ProviderError::transport)?;
        let status = response.status().as_u16();

        // The edge only caches what it finished serving.
        response.bytes().await.map_err(ProviderError::transport)?;
        Ok(status)
    }
}
