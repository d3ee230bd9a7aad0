//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use givpower_engine::api::build_app;
use givpower_engine::app_state::AppState;
use givpower_engine::clients::{BalanceSource, LogNotifier};
use givpower_engine::config::EngineConfig;
use givpower_engine::domain::snapshot::{BalanceUpdate, Boosting, InstantBalance};
use givpower_engine::domain::{ProjectId, UserId};
use givpower_engine::error::EngineError;
use givpower_engine::persistence::{MemoryStore, PowerStore};

/// Balance source serving a fixed list of updates.
#[derive(Debug, Default)]
pub struct StaticSource {
    updates: Mutex<Vec<BalanceUpdate>>,
}

impl StaticSource {
    pub fn new(updates: Vec<BalanceUpdate>) -> Self {
        Self {
            updates: Mutex::new(updates),
        }
    }
}

#[async_trait]
impl BalanceSource for StaticSource {
    async fn fetch_balances(
        &self,
        after_ms: i64,
        skip: u32,
        take: u32,
    ) -> Result<Vec<BalanceUpdate>, EngineError> {
        let updates = self.updates.lock().await;
        Ok(updates
            .iter()
            .filter(|u| u.updated_at > after_ms)
            .skip(skip as usize)
            .take(take as usize)
            .cloned()
            .collect())
    }

    async fn latest_indexed_timestamp(&self) -> Result<i64, EngineError> {
        let updates = self.updates.lock().await;
        Ok(updates.iter().map(|u| u.updated_at).max().unwrap_or(0))
    }
}

/// Store with three projects (the third ineligible) and two users.
///
/// User 1 splits 60/40 between projects 1 and 3; user 2 puts everything on
/// project 2. Instant balances are 100 and 50. With the eligibility filter
/// a snapshot freezes two boosting rows.
pub async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for (project, eligible) in [(1, true), (2, true), (3, false)] {
        store.upsert_project(ProjectId::new(project), eligible).await;
    }
    store.register_user(UserId::new(1), "0xaa").await;
    store.register_user(UserId::new(2), "0xbb").await;
    for (user, project, percentage) in [(1, 1, 60.0), (1, 3, 40.0), (2, 2, 100.0)] {
        store
            .set_boosting(Boosting {
                user_id: UserId::new(user),
                project_id: ProjectId::new(project),
                percentage,
            })
            .await;
    }
    for (user, balance) in [(1, 100.0), (2, 50.0)] {
        let _ = store
            .upsert_instant_balance(InstantBalance {
                user_id: UserId::new(user),
                balance,
                source_updated_at_ms: 1,
            })
            .await;
    }
    store
}

/// Builds the application state around `store` and `source`.
pub fn app_state(store: Arc<MemoryStore>, source: Arc<dyn BalanceSource>) -> AppState {
    let config = EngineConfig {
        propagation_delay_secs: 0,
        ..EngineConfig::default()
    };
    match AppState::new(&config, store, source, Arc::new(LogNotifier)) {
        Ok(state) => state,
        Err(e) => panic!("state should build: {e}"),
    }
}

/// Serves the full application on an ephemeral port.
pub async fn serve(state: AppState) -> SocketAddr {
    let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
        panic!("bind should succeed");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("listener should have an address");
    };
    tokio::spawn(async move {
        let _ = axum::serve(listener, build_app(state)).await;
    });
    addr
}
