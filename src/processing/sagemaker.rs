use std::io::Cursor;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use image::{DynamicImage, ImageOutputFormat};
use reqwest::Client;
use sha2::{Digest, Sha256};
use url::Url;

use super::{BackendRun, ProcessingBackend};
use crate::error::{AppError, AppResult};
use crate::tools::ToolId;

#[derive(Debug, Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SageMakerConfig {
    pub endpoint_name: Option<String>,
    pub region: Option<String>,
    pub credentials: Option<AwsCredentials>,
    /// Overrides the regional runtime host. Test hook.
    pub endpoint_url: Option<String>,
    pub timeout: Duration,
}

/// GFPGAN behind a SageMaker realtime endpoint, invoked directly over HTTP
/// with SigV4 request signing. Face tools only, like the Replicate variant.
pub struct SageMakerBackend {
    config: SageMakerConfig,
    client: Client,
}

impl SageMakerBackend {
    pub fn new(config: SageMakerConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build SageMaker client")?;
        Ok(Self { config, client })
    }

    fn invocation_url(&self, endpoint_name: &str, region: &str) -> String {
        match &self.config.endpoint_url {
            Some(base) => format!(
                "{}/endpoints/{endpoint_name}/invocations",
                base.trim_end_matches('/')
            ),
            None => format!(
                "https://runtime.sagemaker.{region}.amazonaws.com\
                 /endpoints/{endpoint_name}/invocations"
            ),
        }
    }
}

#[async_trait]
impl ProcessingBackend for SageMakerBackend {
    fn name(&self) -> &'static str {
        "sagemaker"
    }

    fn supports(&self, tool: ToolId) -> bool {
        tool.is_face_tool()
    }

    async fn process(&self, _tool: ToolId, image: &DynamicImage) -> AppResult<BackendRun> {
        let endpoint_name = self
            .config
            .endpoint_name
            .as_deref()
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                AppError::HostedConfigMissing(
                    "SageMaker endpoint name (set LENSLAB_SAGEMAKER_ENDPOINT)".to_string(),
                )
            })?;
        let region = self
            .config
            .region
            .as_deref()
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                AppError::HostedConfigMissing(
                    "AWS region (set LENSLAB_SAGEMAKER_REGION, AWS_REGION or AWS_DEFAULT_REGION)"
                        .to_string(),
                )
            })?;
        let credentials = self.config.credentials.as_ref().ok_or_else(|| {
            AppError::HostedConfigMissing(
                "AWS credentials (set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY)".to_string(),
            )
        })?;

        // Always JPEG: the endpoint neither reads nor returns alpha, and the
        // payload stays small.
        let payload = jpeg_payload(image)?;
        let url = self.invocation_url(endpoint_name, region);
        let signed = SignedRequest::build(&url, region, credentials, &payload, Utc::now())?;

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/octet-stream")
            .header("Accept", "image/jpeg")
            .header("X-Amz-Date", &signed.amz_date)
            .header("Authorization", &signed.authorization);
        if let Some(token) = &credentials.session_token {
            request = request.header("X-Amz-Security-Token", token);
        }

        let response = request.body(payload).send().await.map_err(|err| {
            AppError::HostedInvocationFailed(format!("InvokeEndpoint failed: {err}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::HostedInvocationFailed(format!(
                "InvokeEndpoint {}: {}",
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            )));
        }
        let raw = response.bytes().await.map_err(|err| {
            AppError::HostedInvocationFailed(format!("failed to read SageMaker response: {err}"))
        })?;
        let image = image::load_from_memory(&raw).map_err(|err| {
            AppError::HostedInvocationFailed(format!("failed to parse SageMaker output image: {err}"))
        })?;
        Ok(BackendRun { image, attempts: 1 })
    }
}

fn jpeg_payload(image: &DynamicImage) -> AppResult<Vec<u8>> {
    let mut bytes = Vec::new();
    let mut cursor = Cursor::new(&mut bytes);
    DynamicImage::ImageRgb8(image.to_rgb8())
        .write_to(&mut cursor, ImageOutputFormat::Jpeg(95))
        .map_err(|err| AppError::Message(format!("JPEG encode failed: {err}")))?;
    Ok(bytes)
}

struct SignedRequest {
    amz_date: String,
    authorization: String,
}

impl SignedRequest {
    /// SigV4 over exactly the headers we send: content-type, host,
    /// x-amz-date, and the session token when present. Header names are in
    /// canonical (sorted) order.
    fn build(
        url: &str,
        region: &str,
        credentials: &AwsCredentials,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> AppResult<Self> {
        let parsed = Url::parse(url)
            .map_err(|err| AppError::Message(format!("invalid SageMaker URL: {err}")))?;
        let host = match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(AppError::Message("SageMaker URL has no host".to_string())),
        };
        let path = parsed.path();

        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let scope = format!("{date}/{region}/sagemaker/aws4_request");
        let payload_hash = hex::encode(Sha256::digest(payload));

        let mut canonical_headers = format!(
            "content-type:application/octet-stream\nhost:{host}\nx-amz-date:{amz_date}\n"
        );
        let mut signed_headers = "content-type;host;x-amz-date".to_string();
        if let Some(token) = &credentials.session_token {
            canonical_headers.push_str(&format!("x-amz-security-token:{token}\n"));
            signed_headers.push_str(";x-amz-security-token");
        }

        let canonical_request =
            format!("POST\n{path}\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}");
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signing_key =
            derive_signing_key(&credentials.secret_access_key, &date, region, "sagemaker");
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, \
             Signature={signature}",
            credentials.access_key_id
        );
        Ok(Self {
            amz_date,
            authorization,
        })
    }
}

fn derive_signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC can use any key length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}
