//! Cloudflare v4 API adapters: Pages deployment history and zone cache purge.

use std::time::Duration;

use async_trait::async_trait;
use pageship_api_types::{ApiEnvelope, DeploymentRecord, PurgeCacheRequest};
use reqwest::{Client, Method, RequestBuilder, header};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::application::providers::{
    DeploymentPage, DeploymentsApi, EdgeCache, ProviderError,
};
use crate::domain::deployments::Deployment;
use crate::infra::error::InfraError;

/// Authenticated HTTP client bound to one API base.
#[derive(Clone, Debug)]
pub struct CloudflareClient {
    http: Client,
    api_base: Url,
    token: String,
}

impl CloudflareClient {
    pub fn new(api_base: Url, token: &str, timeout: Duration) -> Result<Self, InfraError> {
        let http = Client::builder()
            .user_agent(user_agent())
            .timeout(timeout)
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;
        Ok(Self {
            http,
            api_base,
            token: token.to_string(),
        })
    }

    /// Append path segments to the API base, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ProviderError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|()| {
                ProviderError::InvalidRequest(format!("{} cannot be a base URL", self.api_base))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .header(header::ACCEPT, "application/json")
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<ApiEnvelope<T>, ProviderError> {
        let response = request.send().await.map_err(ProviderError::transport)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(ProviderError::transport)?;

        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        let envelope: ApiEnvelope<T> = serde_json::from_slice(&bytes)
            .map_err(|err| ProviderError::Decode(err.to_string()))?;
        if !envelope.success {
            return Err(ProviderError::Unsuccessful(envelope.error_summary()));
        }
        Ok(envelope)
    }
}

fn user_agent() -> &'static str {
    concat!("pageship/", env!("CARGO_PKG_VERSION"))
}

/// Deployment history of one Pages project.
#[derive(Clone, Debug)]
pub struct PagesDeployments {
    client: CloudflareClient,
    account_id: String,
    project: String,
}

impl PagesDeployments {
    pub fn new(client: CloudflareClient, account_id: &str, project: &str) -> Self {
        Self {
            client,
            account_id: account_id.to_string(),
            project: project.to_string(),
        }
    }

    fn deployments_url(&self, id: Option<&str>) -> Result<Url, ProviderError> {
        let mut segments = vec![
            "accounts",
            self.account_id.as_str(),
            "pages",
            "projects",
            self.project.as_str(),
            "deployments",
        ];
        segments.extend(id);
        self.client.endpoint(&segments)
    }
}

#[async_trait]
impl DeploymentsApi for PagesDeployments {
    async fn list_deployments(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<DeploymentPage, ProviderError> {
        let mut url = self.deployments_url(None)?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("per_page", &per_page.to_string());

        let envelope: ApiEnvelope<Vec<DeploymentRecord>> = self
            .client
            .send(self.client.request(Method::GET, url))
            .await?;

        let records = envelope
            .result
            .ok_or_else(|| ProviderError::Decode("listing response has no result".into()))?;
        debug!(
            target = "pageship::cloudflare",
            page,
            per_page,
            count = records.len(),
            "deployments listed"
        );

        Ok(DeploymentPage {
            deployments: records.into_iter().map(Deployment::from).collect(),
            total_pages: envelope.result_info.and_then(|info| info.total_pages),
        })
    }

    async fn delete_deployment(&self, id: &str) -> Result<(), ProviderError> {
        let mut url = self.deployments_url(Some(id))?;
        url.query_pairs_mut().append_pair("force", "true");

        self.client
            .send::<serde_json::Value>(self.client.request(Method::DELETE, url))
            .await?;
        Ok(())
    }
}

/// Edge cache of one zone.
#[derive(Clone, Debug)]
pub struct ZoneCache {
    client: CloudflareClient,
    zone_id: String,
}

impl ZoneCache {
    pub fn new(client: CloudflareClient, zone_id: &str) -> Self {
        Self {
            client,
            zone_id: zone_id.to_string(),
        }
    }
}

#[async_trait]
impl EdgeCache for ZoneCache {
    async fn purge_everything(&self) -> Result<(), ProviderError> {
        let url = self
            .client
            .endpoint(&["zones", self.zone_id.as_str(), "purge_cache"])?;
        let request = self
            .client
            .request(Method::POST, url)
            .json(&PurgeCacheRequest::everything());

        self.client.send::<serde_json::Value>(request).await?;
        Ok(())
    }
}
