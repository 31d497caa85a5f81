//! Session upload over HTTP.
//!
//! One POST per device per recording. No retry, no timeout, nothing kept
//! on disk: a failed upload's data is gone once the buffer resets.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};

use crate::error::UploadError;
use crate::recording::RecordingSession;

/// Header carrying the anti-forgery token on every request.
pub const CSRF_HEADER: &str = "X-CSRF-Token";
/// Header the auth gateway uses to name the signed-in user.
pub const USER_HEADER: &str = "X-Authenticated-User";

/// Authenticated-user context supplied by the surrounding application.
///
/// Both values are opaque and attached as-is.
pub trait SessionGateway: Send + Sync {
    fn username(&self) -> String;
    fn csrf_token(&self) -> Option<String>;
}

/// Gateway with fixed values, e.g. taken from the command line.
#[derive(Debug, Clone)]
pub struct StaticGateway {
    pub username: String,
    pub csrf_token: Option<String>,
}

impl SessionGateway for StaticGateway {
    fn username(&self) -> String {
        self.username.clone()
    }

    fn csrf_token(&self) -> Option<String> {
        self.csrf_token.clone()
    }
}

/// Body of `POST /data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadPayload {
    pub device: String,
    pub data: RecordingSession,
}

/// Where finished sessions go.
#[async_trait]
pub trait SessionUploader: Send + Sync {
    async fn upload(&self, payload: UploadPayload) -> Result<(), UploadError>;
}

/// reqwest client for the `/data` endpoints.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use muse_recorder::upload::{StaticGateway, UploadClient};
/// # async fn demo() -> Result<(), muse_recorder::error::UploadError> {
/// let gateway = StaticGateway { username: "alice".into(), csrf_token: None };
/// let client = UploadClient::new("http://localhost:3000", Arc::new(gateway))?;
/// for id in client.list().await? {
///     println!("{id}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct UploadClient {
    http: Client,
    base_url: String,
    gateway: Arc<dyn SessionGateway>,
}

impl UploadClient {
    pub fn new(
        base_url: impl Into<String>,
        gateway: Arc<dyn SessionGateway>,
    ) -> Result<Self, UploadError> {
        let http = Client::builder().build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            gateway,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorised(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(USER_HEADER, self.gateway.username());
        match self.gateway.csrf_token() {
            Some(token) => request.header(CSRF_HEADER, token),
            None => request,
        }
    }

    /// Anything but 200 is a failure, with the body kept for the status line.
    async fn expect_ok(response: Response) -> Result<Response, UploadError> {
        let status = response.status();
        if status == reqwest::StatusCode::OK {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(UploadError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// `POST /data` with `payload` as JSON.
    pub async fn post_session(&self, payload: &UploadPayload) -> Result<(), UploadError> {
        let body = serde_json::to_vec(payload)?;
        debug!("{}: posting {} bytes", payload.device, body.len());
        let request = self
            .http
            .post(format!("{}/data", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        Self::expect_ok(self.authorised(request).send().await?).await?;
        info!("{}: session uploaded", payload.device);
        Ok(())
    }

    /// `GET /data`: stored session ids for the current user.
    pub async fn list(&self) -> Result<Vec<String>, UploadError> {
        let request = self.http.get(format!("{}/data", self.base_url));
        let response = Self::expect_ok(self.authorised(request).send().await?).await?;
        Ok(response.json().await?)
    }

    /// `GET /data/{id}`: one stored session.
    pub async fn fetch(&self, id: &str) -> Result<UploadPayload, UploadError> {
        let request = self.http.get(format!("{}/data/{id}", self.base_url));
        let response = Self::expect_ok(self.authorised(request).send().await?).await?;
        Ok(serde_json::from_slice(&response.bytes().await?)?)
    }
}

#[async_trait]
impl SessionUploader for UploadClient {
    async fn upload(&self, payload: UploadPayload) -> Result<(), UploadError> {
        self.post_session(&payload).await
    }
}
