use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;

use crate::{
    core::{
        CoreError, CoreResult,
        instance::{InstanceKey, RegistrationRequest, ServiceInstance},
    },
    ports::discovery::DiscoverySource,
};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RegistryClientError {
    /// Registry could not be reached or the call timed out
    #[error("Registry request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Registry answered with an unexpected status
    #[error("Registry returned {status} for {url}")]
    Status { url: String, status: StatusCode },

    /// The underlying HTTP client could not be built
    #[error("Could not build registry client: {0}")]
    Build(#[source] reqwest::Error),

    /// Registry answer could not be decoded
    #[error("Could not decode registry response from {url}: {message}")]
    Decode { url: String, message: String },
}

pub type RegistryClientResult<T> = Result<T, RegistryClientError>;

/// HTTP client for the registry's JSON API.
#[derive(Clone)]
pub struct RegistryClient {
    base_url: String,
    client: Client,
}

impl RegistryClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> RegistryClientResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(RegistryClientError::Build)?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn transport(url: &str) -> impl FnOnce(reqwest::Error) -> RegistryClientError {
        move |source| RegistryClientError::Transport {
            url: url.to_string(),
            source,
        }
    }

    pub async fn register(&self, request: &RegistrationRequest) -> RegistryClientResult<()> {
        let url = self.url("/register");
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(Self::transport(&url))?;
        if !response.status().is_success() {
            return Err(RegistryClientError::Status {
                url,
                status: response.status(),
            });
        }
        Ok(())
    }

    /// Returns `false` when the registry does not know the instance.
    pub async fn heartbeat(&self, key: &InstanceKey) -> RegistryClientResult<bool> {
        let url = self.url("/heartbeat");
        let response = self
            .client
            .post(&url)
            .json(key)
            .send()
            .await
            .map_err(Self::transport(&url))?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(RegistryClientError::Status { url, status }),
        }
    }

    pub async fn deregister(&self, key: &InstanceKey) -> RegistryClientResult<()> {
        let url = self.url("/deregister");
        let response = self
            .client
            .post(&url)
            .json(key)
            .send()
            .await
            .map_err(Self::transport(&url))?;
        if !response.status().is_success() {
            return Err(RegistryClientError::Status {
                url,
                status: response.status(),
            });
        }
        Ok(())
    }

    pub async fn fetch_service(&self, app_name: &str) -> RegistryClientResult<Vec<ServiceInstance>> {
        self.get_json(&self.url(&format!("/services/{app_name}")))
            .await
    }

    pub async fn fetch_services(
        &self,
    ) -> RegistryClientResult<BTreeMap<String, Vec<ServiceInstance>>> {
        self.get_json(&self.url("/services")).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> RegistryClientResult<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(Self::transport(url))?;
        if !response.status().is_success() {
            return Err(RegistryClientError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| RegistryClientError::Decode {
                url: url.to_string(),
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl DiscoverySource for RegistryClient {
    async fn discover(&self, app_name: &str) -> CoreResult<Vec<ServiceInstance>> {
        self.fetch_service(app_name)
            .await
            .map_err(|e| CoreError::DiscoveryFailed {
                service: app_name.to_string(),
                reason: e.to_string(),
            })
    }
}
