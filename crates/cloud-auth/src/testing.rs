//! Scripted [`ApiTransport`] for tests.

use crate::{ApiRequest, ApiResponse, ApiTransport, AuthResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;

/// Replays queued responses in order and records every request.
///
/// When the queue is empty the fallback response is served, or a 404 when no
/// fallback was set.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<ApiResponse>>,
    fallback: Mutex<Option<ApiResponse>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_status(&self, status: u16, body: impl Into<String>) {
        self.responses
            .lock()
            .push_back(ApiResponse::new(status, body));
    }

    pub fn push_json(&self, status: u16, body: Value) {
        self.push_status(status, body.to_string());
    }

    /// Queue a successful token response.
    pub fn push_token(&self, access_token: &str, refresh_token: &str, expires_in: i64) {
        self.push_json(
            200,
            serde_json::json!({
                "access_token": access_token,
                "refresh_token": refresh_token,
                "expires_in": expires_in,
                "token_type": "Bearer",
            }),
        );
    }

    pub fn set_fallback(&self, status: u16, body: Value) {
        *self.fallback.lock() = Some(ApiResponse::new(status, body.to_string()));
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl ApiTransport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest) -> AuthResult<ApiResponse> {
        self.requests.lock().push(request.clone());
        let scripted = self.responses.lock().pop_front();
        Ok(scripted
            .or_else(|| self.fallback.lock().clone())
            .unwrap_or_else(|| ApiResponse::new(404, "no scripted response")))
    }
}
