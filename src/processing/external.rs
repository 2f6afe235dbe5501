use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine as _;
use image::DynamicImage;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{encode_image, BackendRun, EncodedImage, ProcessingBackend};
use crate::error::{AppError, AppResult};
use crate::tools::ToolId;

/// Console domains that cannot serve inference requests. Pointing the base
/// URL at one of these yields misleading 422s, so the guard rejects them up
/// front.
const BLOCKED_DOMAINS: [&str; 2] = ["aistudio.google.com", "console.cloud.google.com"];

/// A 422 body containing this fragment means the endpoint rejects our
/// request shape structurally. Retrying cannot help, so the attempt loop
/// aborts early instead of burning the full retry budget.
const STRUCTURAL_REJECTION_MARKER: &str = "\"query\",\"request\"";

const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct ExternalApiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub verify_tls: bool,
    pub strict_domain_guard: bool,
}

/// Generic hosted image API speaking multipart-in, image-or-JSON-out. Covers
/// every tool; failures retry with exponential backoff up to `max_retries`.
pub struct ExternalBackend {
    config: ExternalApiConfig,
    client: Client,
}

impl ExternalBackend {
    pub fn new(config: ExternalApiConfig) -> anyhow::Result<Self> {
        if config.base_url.is_empty() {
            anyhow::bail!(
                "LENSLAB_EXTERNAL_BASE_URL must be set when LENSLAB_PROCESSOR_MODE=external"
            );
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .context("failed to build external API client")?;
        Ok(Self { config, client })
    }

    fn endpoint(&self, tool: ToolId) -> String {
        format!(
            "{}/v1/imaging/{}",
            self.config.base_url.trim_end_matches('/'),
            tool.as_str()
        )
    }

    fn check_domain(&self, url: &str) -> Result<(), AppError> {
        if !self.config.strict_domain_guard {
            return Ok(());
        }
        let parsed = Url::parse(url)
            .map_err(|err| AppError::Message(format!("invalid external base URL: {err}")))?;
        if let Some(host) = parsed.host_str() {
            if BLOCKED_DOMAINS.contains(&host) {
                return Err(AppError::ExternalProcessingFailed {
                    attempts: 0,
                    last_error: format!(
                        "'{host}' is a console domain, not an inference API; point \
                         LENSLAB_EXTERNAL_BASE_URL at a real inference endpoint or switch \
                         LENSLAB_PROCESSOR_MODE to local"
                    ),
                });
            }
        }
        Ok(())
    }

    async fn attempt(
        &self,
        url: &str,
        tool: ToolId,
        payload: &EncodedImage,
    ) -> Result<DynamicImage, AttemptError> {
        let part = Part::bytes(payload.bytes.clone())
            .file_name(payload.file_name)
            .mime_str(payload.content_type)
            .map_err(|err| AttemptError::Abort(format!("invalid upload mime type: {err}")))?;
        // The tool identifier rides as both query param and form field;
        // upstream validation has been observed demanding either.
        let form = Form::new()
            .part("file", part)
            .text("request", tool.as_str());

        let mut request = self
            .client
            .post(url)
            .query(&[("request", tool.as_str())])
            .multipart(form);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => return Err(AttemptError::Retry(transport_error_message(&err))),
        };

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response
            .bytes()
            .await
            .map_err(|err| AttemptError::Retry(format!("failed to read response body: {err}")))?;

        if status == StatusCode::UNPROCESSABLE_ENTITY
            && String::from_utf8_lossy(&body).contains(STRUCTURAL_REJECTION_MARKER)
        {
            return Err(AttemptError::Abort(
                "external API demands unknown query param 'request'; endpoint is structurally \
                 incompatible with this client"
                    .to_string(),
            ));
        }
        if status.is_client_error() || status.is_server_error() {
            return Err(AttemptError::Retry(format!(
                "external API {}: {}",
                status.as_u16(),
                body_snippet(&body)
            )));
        }
        decode_response(&body, &content_type)
    }
}

#[async_trait]
impl ProcessingBackend for ExternalBackend {
    fn name(&self) -> &'static str {
        "external"
    }

    fn supports(&self, _tool: ToolId) -> bool {
        true
    }

    async fn process(&self, tool: ToolId, image: &DynamicImage) -> AppResult<BackendRun> {
        let url = self.endpoint(tool);
        self.check_domain(&url)?;

        let payload = encode_image(image, 90)?;
        let mut attempts = 0;
        let mut backoff = RETRY_BASE_DELAY;
        let mut last_error = String::new();

        while attempts < self.config.max_retries {
            attempts += 1;
            match self.attempt(&url, tool, &payload).await {
                Ok(image) => return Ok(BackendRun { image, attempts }),
                Err(AttemptError::Abort(message)) => {
                    last_error = message;
                    break;
                }
                Err(AttemptError::Retry(message)) => {
                    debug!(
                        attempt = attempts,
                        tool = tool.as_str(),
                        error = %message,
                        "external attempt failed"
                    );
                    last_error = message;
                }
            }
            if attempts < self.config.max_retries {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
        Err(AppError::ExternalProcessingFailed {
            attempts,
            last_error,
        })
    }
}

enum AttemptError {
    /// Worth another attempt after backoff.
    Retry(String),
    /// Further attempts cannot succeed.
    Abort(String),
}

fn transport_error_message(err: &reqwest::Error) -> String {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(current) = source {
        if current.to_string().to_ascii_lowercase().contains("certificate") {
            return format!(
                "TLS certificate verification failed: {err}; set \
                 LENSLAB_EXTERNAL_VERIFY_TLS=false only behind a trusted proxy"
            );
        }
        source = current.source();
    }
    format!("request failed: {err}")
}

fn body_snippet(body: &[u8]) -> String {
    String::from_utf8_lossy(body).chars().take(200).collect()
}

#[derive(Deserialize)]
struct JsonImagePayload {
    image_base64: String,
}

fn decode_response(body: &[u8], content_type: &str) -> Result<DynamicImage, AttemptError> {
    if content_type.starts_with("application/json") {
        let payload: JsonImagePayload = serde_json::from_slice(body)
            .map_err(|err| AttemptError::Retry(format!("unusable JSON response: {err}")))?;
        let raw = base64::engine::general_purpose::STANDARD
            .decode(payload.image_base64.as_bytes())
            .map_err(|err| AttemptError::Retry(format!("invalid image_base64: {err}")))?;
        image::load_from_memory(&raw).map_err(|err| {
            AttemptError::Retry(format!("undecodable image in JSON response: {err}"))
        })
    } else {
        image::load_from_memory(body)
            .map_err(|err| AttemptError::Retry(format!("undecodable image response: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(base_url: &str, strict_domain_guard: bool) -> ExternalBackend {
        ExternalBackend::new(ExternalApiConfig {
            base_url: base_url.to_string(),
            api_key: None,
            timeout: Duration::from_secs(5),
            max_retries: 3,
            verify_tls: true,
            strict_domain_guard,
        })
        .unwrap()
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let backend = backend("https://api.example.com/", true);
        assert_eq!(
            backend.endpoint(ToolId::AutoEnhance),
            "https://api.example.com/v1/imaging/auto_enhance"
        );
    }

    #[test]
    fn domain_guard_rejects_console_hosts() {
        let backend = backend("https://aistudio.google.com", true);
        let err = backend
            .check_domain(&backend.endpoint(ToolId::FaceRetouch))
            .unwrap_err();
        match err {
            AppError::ExternalProcessingFailed { attempts, .. } => assert_eq!(attempts, 0),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn domain_guard_can_be_disabled() {
        let backend = backend("https://aistudio.google.com", false);
        assert!(backend
            .check_domain(&backend.endpoint(ToolId::FaceRetouch))
            .is_ok());
    }

    #[test]
    fn missing_base_url_is_a_constructor_error() {
        let result = ExternalBackend::new(ExternalApiConfig {
            base_url: String::new(),
            api_key: None,
            timeout: Duration::from_secs(5),
            max_retries: 3,
            verify_tls: true,
            strict_domain_guard: true,
        });
        assert!(result.is_err());
    }
}
