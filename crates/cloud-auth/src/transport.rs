//! HTTP seam between the REST client and the network.

use crate::AuthResult;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// One REST call: JSON body for token exchanges, bearer token for directory calls.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub body: Option<Value>,
    pub bearer: Option<String>,
}

impl ApiRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: HttpMethod::Get,
            url,
            body: None,
            bearer: None,
        }
    }

    pub fn post(url: Url, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            url,
            body: Some(body),
            bearer: None,
        }
    }

    pub fn bearer(mut self, access_token: impl Into<String>) -> Self {
        self.bearer = Some(access_token.into());
        self
    }
}

/// Raw response: status code and body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends a single request. Retry policy lives above this trait.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> AuthResult<ApiResponse>;
}

/// Production transport backed by `reqwest` with rustls.
#[derive(Clone)]
pub struct ReqwestTransport {
    http_client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> AuthResult<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl ApiTransport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> AuthResult<ApiResponse> {
        let builder = match request.method {
            HttpMethod::Get => self.http_client.get(request.url.clone()),
            HttpMethod::Post => self.http_client.post(request.url.clone()),
        };

        let mut builder = builder.header(ACCEPT, "application/json");
        if let Some(token) = &request.bearer {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = &request.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(serde_json::to_vec(body)?);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(ApiResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builders() {
        let url = Url::parse("https://api.worxlandroid.com/api/v2/products").unwrap();
        let get = ApiRequest::get(url.clone()).bearer("abc");
        assert_eq!(get.method, HttpMethod::Get);
        assert_eq!(get.bearer.as_deref(), Some("abc"));
        assert!(get.body.is_none());

        let post = ApiRequest::post(url, serde_json::json!({"grant_type": "password"}));
        assert_eq!(post.method, HttpMethod::Post);
        assert!(post.bearer.is_none());
    }

    #[test]
    fn success_range() {
        assert!(ApiResponse::new(200, "").is_success());
        assert!(ApiResponse::new(204, "").is_success());
        assert!(!ApiResponse::new(301, "").is_success());
        assert!(!ApiResponse::new(504, "").is_success());
    }
}
