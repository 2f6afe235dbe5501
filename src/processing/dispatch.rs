use image::DynamicImage;
use serde::Serialize;
use tracing::warn;

use super::external::{ExternalApiConfig, ExternalBackend};
use super::local::LocalBackend;
use super::replicate::{ReplicateBackend, ReplicateConfig};
use super::sagemaker::{SageMakerBackend, SageMakerConfig};
use super::{ProcessingBackend, ProcessorMode, Provenance};
use crate::error::{AppError, AppResult};
use crate::tools::ToolId;

/// Full dispatch policy configuration, assembled once at startup. Components
/// receive it by value; nothing reads the environment after boot.
pub struct ProcessorConfig {
    pub mode: ProcessorMode,
    pub allow_fallback: bool,
    pub external: ExternalApiConfig,
    pub replicate: ReplicateConfig,
    pub sagemaker: SageMakerConfig,
}

/// Routes each request to the configured backend and applies the fallback
/// policy. Holds the local backend unconditionally; hosted modes add one
/// remote backend on top.
pub struct Dispatcher {
    mode: ProcessorMode,
    allow_fallback: bool,
    verify_tls: bool,
    strict_domain_guard: bool,
    local: LocalBackend,
    remote: Option<Box<dyn ProcessingBackend>>,
}

impl Dispatcher {
    pub fn new(config: ProcessorConfig) -> anyhow::Result<Self> {
        let verify_tls = config.external.verify_tls;
        let strict_domain_guard = config.external.strict_domain_guard;
        let remote: Option<Box<dyn ProcessingBackend>> = match config.mode {
            ProcessorMode::Local => None,
            ProcessorMode::External => Some(Box::new(ExternalBackend::new(config.external)?)),
            ProcessorMode::Replicate => Some(Box::new(ReplicateBackend::new(config.replicate)?)),
            ProcessorMode::SageMaker => Some(Box::new(SageMakerBackend::new(config.sagemaker)?)),
        };
        Ok(Self {
            mode: config.mode,
            allow_fallback: config.allow_fallback,
            verify_tls,
            strict_domain_guard,
            local: LocalBackend,
            remote,
        })
    }

    pub fn mode(&self) -> ProcessorMode {
        self.mode
    }

    /// Runs `tool` over `image` per the configured mode.
    ///
    /// Hosted modes fall back to local processing on any backend error when
    /// fallback is enabled; with fallback disabled the backend's error
    /// propagates unchanged. A hosted backend that does not support the tool
    /// is rejected up front rather than attempted.
    pub async fn dispatch(
        &self,
        tool: ToolId,
        image: &DynamicImage,
    ) -> AppResult<(DynamicImage, Provenance)> {
        let Some(remote) = &self.remote else {
            return self.run_local(tool, image, false).await;
        };

        if !remote.supports(tool) {
            if !self.allow_fallback {
                return Err(AppError::UnsupportedToolForMode {
                    tool: tool.as_str(),
                    mode: self.mode.as_str(),
                });
            }
            return self.run_local(tool, image, true).await;
        }

        match remote.process(tool, image).await {
            Ok(run) => Ok((
                run.image,
                Provenance {
                    processor: remote.name(),
                    attempts: run.attempts,
                    fallback: false,
                },
            )),
            Err(err) if self.allow_fallback => {
                warn!(
                    backend = remote.name(),
                    tool = tool.as_str(),
                    error = %err,
                    "remote processing failed; falling back to local"
                );
                self.run_local(tool, image, true).await
            }
            Err(err) => Err(err),
        }
    }

    async fn run_local(
        &self,
        tool: ToolId,
        image: &DynamicImage,
        fallback: bool,
    ) -> AppResult<(DynamicImage, Provenance)> {
        let run = self.local.process(tool, image).await?;
        Ok((
            run.image,
            Provenance {
                processor: self.local.name(),
                attempts: run.attempts,
                fallback,
            },
        ))
    }

    /// Live policy snapshot for the debug introspection endpoint.
    pub fn settings(&self) -> DispatchSettings {
        DispatchSettings {
            processor_mode: self.mode.as_str(),
            remote_backend: self.remote.as_ref().map(|backend| backend.name()),
            allow_fallback: self.allow_fallback,
            strict_domain_guard: self.strict_domain_guard,
            external_verify_tls: self.verify_tls,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DispatchSettings {
    pub processor_mode: &'static str,
    pub remote_backend: Option<&'static str>,
    pub allow_fallback: bool,
    pub strict_domain_guard: bool,
    pub external_verify_tls: bool,
}
