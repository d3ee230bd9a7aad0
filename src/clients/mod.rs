//! Outbound integrations: the balance source and the rank-change notifier.
//!
//! Both are traits so the engine can run against HTTP implementations in
//! production and in-process fakes in tests.

pub mod balance_source;
pub mod notifier;

pub use balance_source::{BalanceSource, HttpBalanceSource};
pub use notifier::{HttpNotifier, LogNotifier, RankChangeNotifier};
