//! Typed calls to a discovered service.
//!
//! A [`MethodDescriptor`] names the verb and path of one remote operation; a
//! [`ServiceClient`] binds a service name, an [`InvocationEngine`] and a
//! [`RetryPolicy`] so callers only deal in request/response types.
use std::{borrow::Cow, sync::Arc};

use http::{HeaderMap, HeaderValue, Method, header};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    config::RetryPolicy,
    core::{
        CoreError, CoreResult,
        invoker::{InvocationEngine, InvocationRequest, InvocationResponse},
    },
};

/// Verb and path of one remote operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub method: Method,
    pub path: Cow<'static, str>,
}

impl MethodDescriptor {
    pub fn new(method: Method, path: impl Into<Cow<'static, str>>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }

    pub const fn get(path: &'static str) -> Self {
        Self {
            method: Method::GET,
            path: Cow::Borrowed(path),
        }
    }

    pub const fn post(path: &'static str) -> Self {
        Self {
            method: Method::POST,
            path: Cow::Borrowed(path),
        }
    }

    pub const fn put(path: &'static str) -> Self {
        Self {
            method: Method::PUT,
            path: Cow::Borrowed(path),
        }
    }

    pub const fn patch(path: &'static str) -> Self {
        Self {
            method: Method::PATCH,
            path: Cow::Borrowed(path),
        }
    }

    pub const fn delete(path: &'static str) -> Self {
        Self {
            method: Method::DELETE,
            path: Cow::Borrowed(path),
        }
    }
}

pub struct ServiceClient {
    service_name: String,
    engine: Arc<InvocationEngine>,
    policy: RetryPolicy,
}

impl ServiceClient {
    pub fn new(service_name: impl Into<String>, engine: Arc<InvocationEngine>) -> Self {
        Self {
            service_name: service_name.into(),
            engine,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Call `descriptor` with an optional JSON body and decode the JSON answer.
    pub async fn call<B, R>(&self, descriptor: &MethodDescriptor, body: Option<&B>) -> CoreResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let payload = match body {
            Some(body) => serde_json::to_vec(body).map_err(|e| CoreError::Encode {
                service: self.service_name.clone(),
                message: e.to_string(),
            })?,
            None => Vec::new(),
        };

        let response = self.call_raw(descriptor, payload).await?;
        serde_json::from_slice(&response.body).map_err(|e| CoreError::Decode {
            service: self.service_name.clone(),
            message: e.to_string(),
        })
    }

    /// Call `descriptor` and hand back the buffered 2xx response.
    pub async fn call_raw(
        &self,
        descriptor: &MethodDescriptor,
        body: impl Into<bytes::Bytes>,
    ) -> CoreResult<InvocationResponse> {
        let (path, query) = match descriptor.path.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (descriptor.path.to_string(), None),
        };

        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let request = InvocationRequest::new(descriptor.method.clone(), path)
            .with_query(query)
            .with_headers(headers)
            .with_body(body);

        self.engine
            .invoke(&self.service_name, &request, &self.policy)
            .await
    }
}
