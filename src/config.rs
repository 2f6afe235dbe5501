use std::time::Duration;

use once_cell::sync::Lazy;

use crate::processing::dispatch::ProcessorConfig;
use crate::processing::external::ExternalApiConfig;
use crate::processing::replicate::ReplicateConfig;
use crate::processing::sagemaker::{AwsCredentials, SageMakerConfig};
use crate::processing::ProcessorMode;

/// Secret used for JWT signing. Must be set via the `JWT_SECRET` env variable.
pub static JWT_SECRET: Lazy<String> =
    Lazy::new(|| std::env::var("JWT_SECRET").expect("JWT_SECRET must be set"));

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `8000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8000)
});

/// When set to a truthy value, allows the application to continue running even if database
/// migrations fail. Defaults to `false`.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> =
    Lazy::new(|| truthy_env("ALLOW_MIGRATION_FAILURE", false));

fn parse_processor_mode() -> ProcessorMode {
    match std::env::var("LENSLAB_PROCESSOR_MODE") {
        Ok(raw) => {
            let normalized = raw.trim().to_ascii_lowercase();
            match normalized.as_str() {
                "" | "local" => ProcessorMode::Local,
                "external" => ProcessorMode::External,
                "replicate" => ProcessorMode::Replicate,
                "sagemaker" => ProcessorMode::SageMaker,
                other => panic!(
                    "unsupported LENSLAB_PROCESSOR_MODE value '{other}'; expected 'local', 'external', 'replicate' or 'sagemaker'"
                ),
            }
        }
        Err(_) => ProcessorMode::Local,
    }
}

/// Builds the dispatch policy configuration once at startup. The dispatcher
/// owns the resulting snapshot; nothing re-reads the environment per request.
pub fn processor_config_from_env() -> ProcessorConfig {
    let external = ExternalApiConfig {
        base_url: read_optional_env("LENSLAB_EXTERNAL_BASE_URL").unwrap_or_default(),
        api_key: read_optional_env("LENSLAB_EXTERNAL_API_KEY"),
        timeout: Duration::from_secs(
            std::env::var("LENSLAB_EXTERNAL_TIMEOUT_SECS")
                .ok()
                .and_then(|value| value.parse::<u64>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(15),
        ),
        max_retries: std::env::var("LENSLAB_EXTERNAL_MAX_RETRIES")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(3),
        verify_tls: truthy_env("LENSLAB_EXTERNAL_VERIFY_TLS", true),
        strict_domain_guard: truthy_env("LENSLAB_STRICT_DOMAIN_GUARD", true),
    };

    let replicate = ReplicateConfig {
        api_base: read_optional_env("LENSLAB_REPLICATE_API_BASE")
            .unwrap_or_else(|| "https://api.replicate.com".to_string()),
        api_token: read_optional_env("REPLICATE_API_TOKEN")
            .or_else(|| read_optional_env("LENSLAB_REPLICATE_API_TOKEN")),
        model: read_optional_env("LENSLAB_REPLICATE_MODEL")
            .unwrap_or_else(|| "tencentarc/gfpgan".to_string()),
        timeout: Duration::from_secs(
            std::env::var("LENSLAB_REPLICATE_TIMEOUT_SECS")
                .ok()
                .and_then(|value| value.parse::<u64>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(60),
        ),
    };

    let credentials = match (
        read_optional_env("AWS_ACCESS_KEY_ID"),
        read_optional_env("AWS_SECRET_ACCESS_KEY"),
    ) {
        (Some(access_key_id), Some(secret_access_key)) => Some(AwsCredentials {
            access_key_id,
            secret_access_key,
            session_token: read_optional_env("AWS_SESSION_TOKEN"),
        }),
        _ => None,
    };
    let sagemaker = SageMakerConfig {
        endpoint_name: read_optional_env("LENSLAB_SAGEMAKER_ENDPOINT"),
        region: read_optional_env("LENSLAB_SAGEMAKER_REGION")
            .or_else(|| read_optional_env("AWS_REGION"))
            .or_else(|| read_optional_env("AWS_DEFAULT_REGION")),
        credentials,
        endpoint_url: read_optional_env("LENSLAB_SAGEMAKER_URL"),
        timeout: Duration::from_secs(
            std::env::var("LENSLAB_SAGEMAKER_TIMEOUT_SECS")
                .ok()
                .and_then(|value| value.parse::<u64>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(60),
        ),
    };

    ProcessorConfig {
        mode: parse_processor_mode(),
        allow_fallback: truthy_env("LENSLAB_ALLOW_FALLBACK", true),
        external,
        replicate,
        sagemaker,
    }
}

fn truthy_env(key: &str, default_value: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes")
        })
        .unwrap_or(default_value)
}

pub fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
