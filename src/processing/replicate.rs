use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine as _;
use image::DynamicImage;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{encode_image, BackendRun, ProcessingBackend};
use crate::error::{AppError, AppResult};
use crate::tools::ToolId;

#[derive(Debug, Clone)]
pub struct ReplicateConfig {
    pub api_base: String,
    pub api_token: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

/// Hosted GFPGAN on Replicate. Face tools only; the model restores faces and
/// would mangle anything else. Runs synchronously via the `Prefer: wait`
/// prediction API.
pub struct ReplicateBackend {
    config: ReplicateConfig,
    client: Client,
}

impl ReplicateBackend {
    pub fn new(config: ReplicateConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build Replicate client")?;
        Ok(Self { config, client })
    }

    fn predictions_url(&self) -> String {
        format!(
            "{}/v1/models/{}/predictions",
            self.config.api_base.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl ProcessingBackend for ReplicateBackend {
    fn name(&self) -> &'static str {
        "replicate"
    }

    fn supports(&self, tool: ToolId) -> bool {
        tool.is_face_tool()
    }

    async fn process(&self, _tool: ToolId, image: &DynamicImage) -> AppResult<BackendRun> {
        // Token is checked per call, not at construction, so the server
        // still boots in replicate mode and falls back when unconfigured.
        let token = self
            .config
            .api_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                AppError::HostedConfigMissing(
                    "Replicate API token (set REPLICATE_API_TOKEN or LENSLAB_REPLICATE_API_TOKEN)"
                        .to_string(),
                )
            })?;

        let payload = encode_image(image, 95)?;
        let data_uri = format!(
            "data:{};base64,{}",
            payload.content_type,
            base64::engine::general_purpose::STANDARD.encode(&payload.bytes)
        );

        let response = self
            .client
            .post(self.predictions_url())
            .bearer_auth(token)
            .header("Prefer", "wait")
            .json(&json!({ "input": { "img": data_uri } }))
            .send()
            .await
            .map_err(|err| {
                AppError::HostedInvocationFailed(format!("Replicate run failed: {err}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::HostedInvocationFailed(format!(
                "Replicate API {}: {}",
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            )));
        }

        let prediction: PredictionResponse = response.json().await.map_err(|err| {
            AppError::HostedInvocationFailed(format!("unparseable Replicate response: {err}"))
        })?;

        if prediction.status.as_deref() != Some("succeeded") {
            let detail = match &prediction.error {
                Some(value) => value.to_string(),
                None => format!(
                    "prediction status '{}'",
                    prediction.status.as_deref().unwrap_or("unknown")
                ),
            };
            return Err(AppError::HostedInvocationFailed(format!(
                "Replicate run failed: {detail}"
            )));
        }

        let output_url = output_url(&prediction.output).ok_or_else(|| {
            AppError::HostedInvocationFailed("Replicate response carried no output URL".to_string())
        })?;

        let raw = self
            .client
            .get(&output_url)
            .send()
            .await
            .map_err(|err| {
                AppError::HostedInvocationFailed(format!("failed to fetch Replicate output: {err}"))
            })?
            .bytes()
            .await
            .map_err(|err| {
                AppError::HostedInvocationFailed(format!("failed to read Replicate output: {err}"))
            })?;

        let image = image::load_from_memory(&raw).map_err(|err| {
            AppError::HostedInvocationFailed(format!("failed to parse Replicate output: {err}"))
        })?;
        Ok(BackendRun { image, attempts: 1 })
    }
}

#[derive(Deserialize)]
struct PredictionResponse {
    status: Option<String>,
    output: Option<Value>,
    error: Option<Value>,
}

/// The GFPGAN model answers either a bare URL string or a list of URLs; the
/// last list entry is the final output.
fn output_url(output: &Option<Value>) -> Option<String> {
    match output {
        Some(Value::String(url)) => Some(url.clone()),
        Some(Value::Array(items)) => items
            .iter()
            .rev()
            .find_map(|item| item.as_str().map(str::to_string)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_url_accepts_string_and_array_shapes() {
        let single = Some(json!("https://replicate.delivery/out.png"));
        assert_eq!(
            output_url(&single).as_deref(),
            Some("https://replicate.delivery/out.png")
        );

        let list = Some(json!(["https://a/0.png", "https://a/1.png"]));
        assert_eq!(output_url(&list).as_deref(), Some("https://a/1.png"));

        assert_eq!(output_url(&Some(json!({"weird": true}))), None);
        assert_eq!(output_url(&None), None);
    }

    #[test]
    fn only_face_tools_are_supported() {
        let backend = ReplicateBackend::new(ReplicateConfig {
            api_base: "https://api.replicate.com".to_string(),
            api_token: None,
            model: "tencentarc/gfpgan".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap();
        assert!(backend.supports(ToolId::FaceRetouch));
        assert!(backend.supports(ToolId::AutoEnhance));
        assert!(!backend.supports(ToolId::SkyReplacement));
    }
}
