//! Domain layer: identifiers, round clock, snapshot records, ranking and
//! the event system.
//!
//! Everything here is free of I/O. The service layer feeds it data read
//! from a [`crate::persistence::PowerStore`].

pub mod engine_event;
pub mod event_bus;
pub mod ids;
pub mod rank_diff;
pub mod ranking;
pub mod round_clock;
pub mod snapshot;

pub use engine_event::{EngineEvent, EventTopic};
pub use event_bus::EventBus;
pub use ids::{ProjectId, SnapshotId, UserId};
pub use rank_diff::{ProjectRankChange, RankChangeNotice};
pub use ranking::{RankEntry, RankingView, ViewKind};
pub use round_clock::{RoundClock, RoundWindow};
