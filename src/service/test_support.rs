//! In-process fakes shared by the service tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::clients::{BalanceSource, RankChangeNotifier};
use crate::domain::RankChangeNotice;
use crate::domain::snapshot::BalanceUpdate;
use crate::error::EngineError;

/// Balance source serving a fixed list of updates.
#[derive(Debug, Default)]
pub struct FakeBalanceSource {
    updates: Mutex<Vec<BalanceUpdate>>,
    latest_indexed: Mutex<i64>,
    failures: Mutex<VecDeque<EngineError>>,
    requests: Mutex<Vec<(i64, u32, u32)>>,
    unordered: bool,
}

impl FakeBalanceSource {
    pub fn with_updates(updates: &[(&str, f64, i64)]) -> Self {
        let source = Self::default();
        for &(address, balance, updated_at) in updates {
            source.push(address, balance, updated_at);
        }
        source
    }

    /// Serves updates in insertion order instead of sorting pages by time.
    pub fn unordered(mut self) -> Self {
        self.unordered = true;
        self
    }

    pub fn push(&self, address: &str, balance: f64, updated_at: i64) {
        if let Ok(mut updates) = self.updates.lock() {
            updates.push(BalanceUpdate {
                address: address.to_string(),
                balance,
                updated_at,
            });
        }
        if let Ok(mut latest) = self.latest_indexed.lock() {
            *latest = (*latest).max(updated_at);
        }
    }

    pub fn set_latest_indexed(&self, timestamp: i64) {
        if let Ok(mut latest) = self.latest_indexed.lock() {
            *latest = timestamp;
        }
    }

    /// Queues errors returned by the next `fetch_balances` calls.
    pub fn fail_with(&self, error: EngineError) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push_back(error);
        }
    }

    /// `(after_ms, skip, take)` of every successful request.
    pub fn requests(&self) -> Vec<(i64, u32, u32)> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl BalanceSource for FakeBalanceSource {
    async fn fetch_balances(
        &self,
        after_ms: i64,
        skip: u32,
        take: u32,
    ) -> Result<Vec<BalanceUpdate>, EngineError> {
        if let Some(error) = self.failures.lock().ok().and_then(|mut f| f.pop_front()) {
            return Err(error);
        }
        if let Ok(mut requests) = self.requests.lock() {
            requests.push((after_ms, skip, take));
        }
        let mut matching: Vec<BalanceUpdate> = self
            .updates
            .lock()
            .map(|u| u.iter().filter(|b| b.updated_at > after_ms).cloned().collect())
            .unwrap_or_default();
        if !self.unordered {
            matching.sort_by_key(|b| b.updated_at);
        }
        Ok(matching
            .into_iter()
            .skip(skip as usize)
            .take(take as usize)
            .collect())
    }

    async fn latest_indexed_timestamp(&self) -> Result<i64, EngineError> {
        Ok(self.latest_indexed.lock().map(|l| *l).unwrap_or(0))
    }
}

/// Notifier remembering every notice it received.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<RankChangeNotice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<RankChangeNotice> {
        self.notices.lock().map(|n| n.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RankChangeNotifier for RecordingNotifier {
    async fn notify(&self, notice: &RankChangeNotice) -> Result<(), EngineError> {
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(notice.clone());
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
