//! # givpower-engine
//!
//! Round snapshot and project ranking engine for GIVpower.
//!
//! Users stake tokens and allocate percentages of their voting power to
//! projects. Time is split into fixed-length rounds. The engine freezes each
//! round's allocations in a snapshot, fills the snapshot with token balances
//! pulled from an external balance source, ranks projects on the result and
//! reports rank movements when a round rolls over.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP, WebSocket)
//!     │
//!     ├── REST Handlers (api/)
//!     ├── WS Handler (ws/)
//!     │
//!     ├── RolloverOrchestrator ── SnapshotWriter
//!     ├── BalanceSyncService ──── BalanceSource (clients/)
//!     ├── RankingEngine           RankChangeNotifier (clients/)
//!     ├── EventBus (domain/)
//!     │
//!     └── PowerStore (PostgreSQL or in-memory)
//! ```

pub mod api;
pub mod app_state;
pub mod clients;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod service;
pub mod ws;
