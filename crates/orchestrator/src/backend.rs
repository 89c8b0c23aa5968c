use async_trait::async_trait;
use gridimg_core::JobDescriptor;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct PopRequest {
    pub(crate) api_key: String,
    pub(crate) worker_name: String,
    pub(crate) bridge_agent: String,
    pub(crate) models: Vec<String>,
    pub(crate) nsfw: bool,
    pub(crate) threads: usize,
    pub(crate) max_pixels: u64,
    pub(crate) allow_img2img: bool,
    pub(crate) allow_inpainting: bool,
    pub(crate) allow_post_processing: bool,
    pub(crate) allow_controlnet: bool,
    pub(crate) allow_lora: bool,
    pub(crate) allow_unsafe_ip: bool,
    pub(crate) require_upfront_kudos: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PopResponse {
    pub(crate) job: Option<JobDescriptor>,
    #[serde(default)]
    pub(crate) skipped: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub(crate) struct SubmitRequest {
    pub(crate) api_key: String,
    pub(crate) job_id: String,
    pub(crate) seed: i64,
    pub(crate) generation: String,
    pub(crate) state: gridimg_core::JobOutcomeState,
    pub(crate) censored: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SubmitResponse {
    pub(crate) reward: f64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserRecord {
    pub(crate) username: String,
    pub(crate) kudos: f64,
}

/// The three dispatch-API operations the orchestrator needs (§4.6, §6.4), behind
/// a trait boundary so the API loop can be exercised against a fake in tests.
#[async_trait]
pub(crate) trait DispatchApiClient: Send + Sync {
    async fn pop_job(&self, req: PopRequest) -> Result<PopResponse, OrchestratorError>;
    async fn submit_job(&self, req: SubmitRequest) -> Result<SubmitResponse, OrchestratorError>;
    async fn find_user(&self, api_key: &str) -> Result<UserRecord, OrchestratorError>;
}

/// HTTP PUT of raw bytes to a presigned object-store URL (§4.9).
#[async_trait]
pub(crate) trait Uploader: Send + Sync {
    async fn put(&self, url: &str, body: Vec<u8>) -> Result<u16, OrchestratorError>;
}

pub(crate) struct HttpDispatchClient {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpDispatchClient {
    pub(crate) fn new(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    async fn parse_error(res: reqwest::Response) -> OrchestratorError {
        let body = res.text().await.unwrap_or_default();
        if let Ok(err) = serde_json::from_str::<ApiErrorBody>(&body) {
            return OrchestratorError::DispatchApi {
                code: err.code,
                detail: err.message,
            };
        }
        OrchestratorError::DispatchApi {
            code: "unknown".to_string(),
            detail: body,
        }
    }
}

#[async_trait]
impl DispatchApiClient for HttpDispatchClient {
    async fn pop_job(&self, req: PopRequest) -> Result<PopResponse, OrchestratorError> {
        let url = self
            .base_url
            .join("api/v2/generate/pop")
            .map_err(|e| OrchestratorError::InvalidUrl(e.to_string()))?;
        let res = self.http.post(url).json(&req).send().await?;
        if !res.status().is_success() {
            return Err(Self::parse_error(res).await);
        }
        Ok(res.json().await?)
    }

    async fn submit_job(&self, req: SubmitRequest) -> Result<SubmitResponse, OrchestratorError> {
        let url = self
            .base_url
            .join(&format!("api/v2/generate/submit/{}", req.job_id))
            .map_err(|e| OrchestratorError::InvalidUrl(e.to_string()))?;
        let res = self.http.post(url).json(&req).send().await?;
        if !res.status().is_success() {
            return Err(Self::parse_error(res).await);
        }
        Ok(res.json().await?)
    }

    async fn find_user(&self, api_key: &str) -> Result<UserRecord, OrchestratorError> {
        let url = self
            .base_url
            .join("api/v2/find_user")
            .map_err(|e| OrchestratorError::InvalidUrl(e.to_string()))?;
        let res = self
            .http
            .post(url)
            .json(&serde_json::json!({ "apikey": api_key }))
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(Self::parse_error(res).await);
        }
        Ok(res.json().await?)
    }
}

pub(crate) struct HttpUploader {
    http: reqwest::Client,
}

impl HttpUploader {
    pub(crate) fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn put(&self, url: &str, body: Vec<u8>) -> Result<u16, OrchestratorError> {
        let res = self.http.put(url).body(body).send().await?;
        Ok(res.status().as_u16())
    }
}
