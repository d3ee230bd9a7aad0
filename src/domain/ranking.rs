//! Project ranking by boosted power.
//!
//! [`rank_projects`] is the pure core of every ranking view: it aggregates
//! `balance × percentage / 100` per project and assigns dense, distinct
//! ranks. Ordering is eligible projects first, then power descending, then
//! project id ascending, so identical inputs always yield identical ranks.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::snapshot::{PowerInput, ProjectRecord};
use super::{ProjectId, SnapshotId};
use crate::error::EngineError;

/// The four published ranking views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ViewKind {
    /// Latest synced snapshot of the persisted current round.
    Current,
    /// Latest synced snapshot tagged with the next round.
    Future,
    /// Latest synced snapshot of any round.
    LastSnapshot,
    /// Instant balances joined with live boosting.
    Instant,
}

impl ViewKind {
    /// Every view, in refresh order.
    pub const ALL: [Self; 4] = [Self::Current, Self::Future, Self::LastSnapshot, Self::Instant];

    /// URL-safe view name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Future => "future",
            Self::LastSnapshot => "last-snapshot",
            Self::Instant => "instant",
        }
    }
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViewKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| EngineError::UnknownView(s.to_string()))
    }
}

/// One project's position in a view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct RankEntry {
    /// Ranked project.
    pub project_id: ProjectId,
    /// Aggregate boosted power (zero for ineligible projects).
    pub power: f64,
    /// 1-based rank; distinct per project.
    pub rank: u32,
    /// Whether the project is eligible for boosted power.
    pub eligible: bool,
}

/// Immutable result of one view computation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingView {
    /// Which view this is.
    pub kind: ViewKind,
    /// Round the underlying snapshot belongs to, if any.
    pub round_number: Option<i64>,
    /// Snapshot the view was computed from (`None` for instant views and
    /// when no qualifying snapshot exists).
    pub snapshot_id: Option<SnapshotId>,
    /// When the view was computed.
    pub computed_at: DateTime<Utc>,
    /// Entries ordered by rank.
    pub entries: Vec<RankEntry>,
}

impl RankingView {
    /// Builds a view from raw power inputs.
    #[must_use]
    pub fn compute(
        kind: ViewKind,
        round_number: Option<i64>,
        snapshot_id: Option<SnapshotId>,
        inputs: &[PowerInput],
        projects: &[ProjectRecord],
        eligibility_filter: bool,
    ) -> Self {
        Self {
            kind,
            round_number,
            snapshot_id,
            computed_at: Utc::now(),
            entries: rank_projects(inputs, projects, eligibility_filter),
        }
    }

    /// Looks up a project's entry.
    #[must_use]
    pub fn entry(&self, project_id: ProjectId) -> Option<&RankEntry> {
        self.entries.iter().find(|e| e.project_id == project_id)
    }

    /// Rank of the lowest-ranked eligible project.
    #[must_use]
    pub fn bottom_rank(&self) -> Option<u32> {
        self.entries
            .iter()
            .filter(|e| e.eligible)
            .map(|e| e.rank)
            .max()
    }

    /// Project → rank map, used for round-over-round diffing.
    #[must_use]
    pub fn ranks(&self) -> BTreeMap<ProjectId, u32> {
        self.entries.iter().map(|e| (e.project_id, e.rank)).collect()
    }
}

/// Aggregates power per project and assigns ranks.
///
/// Every project in `projects` appears in the result even without boosts;
/// projects that only appear in `inputs` are included too. With
/// `eligibility_filter` set, projects not flagged eligible (including
/// unknown ones) get zero power and rank after every eligible project.
#[must_use]
pub fn rank_projects(
    inputs: &[PowerInput],
    projects: &[ProjectRecord],
    eligibility_filter: bool,
) -> Vec<RankEntry> {
    let eligibility: HashMap<ProjectId, bool> =
        projects.iter().map(|p| (p.id, p.eligible)).collect();

    let mut contributions: BTreeMap<ProjectId, Vec<f64>> = BTreeMap::new();
    for project in projects {
        contributions.entry(project.id).or_default();
    }
    for input in inputs {
        contributions
            .entry(input.project_id)
            .or_default()
            .push(input.power());
    }

    let mut entries: Vec<RankEntry> = contributions
        .into_iter()
        .map(|(project_id, mut parts)| {
            // Summation order is fixed so insertion order cannot move ties.
            parts.sort_by(f64::total_cmp);
            let eligible =
                !eligibility_filter || eligibility.get(&project_id).copied().unwrap_or(false);
            // An empty f64 sum is -0.0; adding 0.0 folds it into 0.0.
            let power = if eligible {
                parts.iter().sum::<f64>() + 0.0
            } else {
                0.0
            };
            RankEntry {
                project_id,
                power,
                rank: 0,
                eligible,
            }
        })
        .collect();

    entries.sort_by(compare_entries);
    for (position, entry) in entries.iter_mut().enumerate() {
        entry.rank = u32::try_from(position.saturating_add(1)).unwrap_or(u32::MAX);
    }
    entries
}

fn compare_entries(a: &RankEntry, b: &RankEntry) -> Ordering {
    b.eligible
        .cmp(&a.eligible)
        .then_with(|| b.power.total_cmp(&a.power))
        .then_with(|| a.project_id.cmp(&b.project_id))
}
