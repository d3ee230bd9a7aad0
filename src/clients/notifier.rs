//! Delivery of rank-change notices after a rollover.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::domain::RankChangeNotice;
use crate::error::EngineError;

/// Receives the rank diff computed at each rollover.
#[async_trait]
pub trait RankChangeNotifier: Send + Sync + std::fmt::Debug {
    /// Delivers one notice.
    async fn notify(&self, notice: &RankChangeNotice) -> Result<(), EngineError>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// POSTs notices as JSON to a configured endpoint.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    url: String,
    client: Client,
}

impl HttpNotifier {
    /// Creates a notifier with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] if the HTTP client cannot be
    /// built.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::InvalidConfig(format!("notifier client: {e}")))?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }
}

#[async_trait]
impl RankChangeNotifier for HttpNotifier {
    async fn notify(&self, notice: &RankChangeNotice) -> Result<(), EngineError> {
        let response = self
            .client
            .post(&self.url)
            .json(notice)
            .send()
            .await
            .map_err(|e| EngineError::NotificationFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::NotificationFailed(format!("status {status}")));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Writes notices to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl RankChangeNotifier for LogNotifier {
    async fn notify(&self, notice: &RankChangeNotice) -> Result<(), EngineError> {
        tracing::info!(
            round = notice.round_number,
            old_bottom_rank = ?notice.old_bottom_rank,
            new_bottom_rank = ?notice.new_bottom_rank,
            changes = notice.project_rank_changes.len(),
            "rank changes"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
