//! Off-box delivery of finished artifacts through the Telegram Bot API.
//!
//! Delivery never fails a cycle by itself: every path ends in a
//! [`DeliveryOutcome`] that retention and the scheduler act on.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{error, info};

use crate::artifact::BackupArtifact;
use crate::build_info;
use crate::config::DeliveryConfig;

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// The API accepted the document.
    Uploaded,
    /// Delivery is not configured.
    Skipped,
    /// The attempt was made and did not succeed.
    Failed { reason: Option<String> },
}

impl DeliveryOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, DeliveryOutcome::Failed { .. })
    }
}

/// Body of every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    ok: bool,
    description: Option<String>,
}

/// Sends artifacts with `sendDocument`.
pub struct TelegramDelivery {
    client: Client,
    config: DeliveryConfig,
}

impl TelegramDelivery {
    pub fn new(config: DeliveryConfig) -> reqwest::Result<Self> {
        let client = Client::builder()
            .user_agent(format!("dumpwarden/{}", build_info::VERSION))
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        self.config.credentials().is_some()
    }

    /// Upload `artifact` once. No retries.
    pub async fn deliver(&self, artifact: &BackupArtifact) -> DeliveryOutcome {
        let Some((token, chat_id)) = self.config.credentials() else {
            info!("Telegram delivery not configured, keeping artifact locally");
            return DeliveryOutcome::Skipped;
        };

        let form = match self.form(artifact, chat_id).await {
            Ok(form) => form,
            Err(e) => {
                error!(artifact = %artifact.path.display(), error = %e, "Cannot read artifact for delivery");
                return DeliveryOutcome::Failed {
                    reason: Some(e.to_string()),
                };
            }
        };

        info!(artifact = %artifact.file_name(), "Uploading artifact to Telegram");

        // The token is part of the URL; reqwest errors are logged without it.
        let url = format!(
            "{}/bot{}/sendDocument",
            self.config.api_url.trim_end_matches('/'),
            token
        );
        let response = match self.client.post(&url).multipart(form).send().await {
            Ok(response) => response,
            Err(e) => return network_failure(e),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return network_failure(e),
        };

        match serde_json::from_str::<ApiResponse>(&body) {
            Ok(api) if api.ok => {
                info!(artifact = %artifact.file_name(), "Artifact delivered");
                DeliveryOutcome::Uploaded
            }
            Ok(ApiResponse {
                description: Some(description),
                ..
            }) => {
                error!(status = status.as_u16(), %description, "Telegram rejected the upload");
                DeliveryOutcome::Failed {
                    reason: Some(description),
                }
            }
            _ => {
                error!(status = status.as_u16(), "Telegram upload failed");
                DeliveryOutcome::Failed { reason: None }
            }
        }
    }

    async fn form(&self, artifact: &BackupArtifact, chat_id: &str) -> std::io::Result<Form> {
        let file = tokio::fs::File::open(&artifact.path).await?;
        let len = file.metadata().await?.len();
        let document = Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), len)
            .file_name(artifact.file_name())
            .mime_str("application/zip")
            .map_err(std::io::Error::other)?;

        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text(
                "caption",
                format!("{} {}", self.config.caption_prefix, artifact.label()),
            );
        if let Some(thread_id) = self.config.thread_id() {
            form = form.text("message_thread_id", thread_id.to_string());
        }
        Ok(form.part("document", document))
    }
}

fn network_failure(e: reqwest::Error) -> DeliveryOutcome {
    let e = e.without_url();
    if e.is_timeout() {
        error!(error = %e, "Telegram upload timed out");
    } else {
        error!(error = %e, "Telegram unreachable");
    }
    DeliveryOutcome::Failed {
        reason: Some(e.to_string()),
    }
}
