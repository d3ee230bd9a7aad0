//! Round-over-round rank changes.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use utoipa::ToSchema;

use super::ProjectId;
use super::ranking::RankingView;

/// Ranks saved immediately before a rollover, used only for diffing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PreviousRoundRanks {
    /// Round the ranks were taken from.
    pub round_number: i64,
    /// Project → rank at the end of that round.
    pub ranks: BTreeMap<ProjectId, u32>,
}

/// Rank movement of a single project.
///
/// `old_rank` is `None` for projects that were not ranked before the
/// rollover and `new_rank` is `None` for projects that dropped out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRankChange {
    /// Project whose rank moved.
    pub project_id: ProjectId,
    /// Rank at the end of the previous round.
    pub old_rank: Option<u32>,
    /// Rank after the rollover.
    pub new_rank: Option<u32>,
}

/// Payload handed to the notification emitter after a rollover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RankChangeNotice {
    /// Round that just started.
    pub round_number: i64,
    /// Rank of the lowest eligible project before the rollover.
    pub old_bottom_rank: Option<u32>,
    /// Rank of the lowest eligible project after the rollover.
    pub new_bottom_rank: Option<u32>,
    /// Every project whose rank differs, ordered by project id.
    pub project_rank_changes: Vec<ProjectRankChange>,
}

impl RankChangeNotice {
    /// Diffs the ranks saved before a rollover against the new view.
    #[must_use]
    pub fn between(
        round_number: i64,
        previous: &BTreeMap<ProjectId, u32>,
        old_bottom_rank: Option<u32>,
        current: &RankingView,
    ) -> Self {
        let next = current.ranks();
        let project_ids: BTreeSet<ProjectId> =
            previous.keys().chain(next.keys()).copied().collect();

        let project_rank_changes = project_ids
            .into_iter()
            .filter_map(|project_id| {
                let old_rank = previous.get(&project_id).copied();
                let new_rank = next.get(&project_id).copied();
                (old_rank != new_rank).then_some(ProjectRankChange {
                    project_id,
                    old_rank,
                    new_rank,
                })
            })
            .collect();

        Self {
            round_number,
            old_bottom_rank,
            new_bottom_rank: current.bottom_rank(),
            project_rank_changes,
        }
    }

    /// `true` when nothing moved, including the bottom rank.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.project_rank_changes.is_empty() && self.old_bottom_rank == self.new_bottom_rank
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::ranking::{RankEntry, ViewKind};

    fn view(ranks: &[(i64, u32, bool)]) -> RankingView {
        RankingView {
            kind: ViewKind::Current,
            round_number: Some(2),
            snapshot_id: None,
            computed_at: Utc::now(),
            entries: ranks
                .iter()
                .map(|&(id, rank, eligible)| RankEntry {
                    project_id: ProjectId::new(id),
                    power: 0.0,
                    rank,
                    eligible,
                })
                .collect(),
        }
    }

    fn previous(ranks: &[(i64, u32)]) -> BTreeMap<ProjectId, u32> {
        ranks
            .iter()
            .map(|&(id, rank)| (ProjectId::new(id), rank))
            .collect()
    }

    #[test]
    fn reports_only_moved_projects() {
        let old = previous(&[(1, 1), (2, 2), (3, 3)]);
        let new = view(&[(2, 1, true), (1, 2, true), (3, 3, true)]);
        let notice = RankChangeNotice::between(2, &old, Some(3), &new);

        assert_eq!(notice.project_rank_changes.len(), 2);
        assert_eq!(
            notice.project_rank_changes.first(),
            Some(&ProjectRankChange {
                project_id: ProjectId::new(1),
                old_rank: Some(1),
                new_rank: Some(2),
            })
        );
        assert_eq!(notice.new_bottom_rank, Some(3));
        assert!(!notice.is_unchanged());
    }

    #[test]
    fn tracks_entering_and_leaving_projects() {
        let old = previous(&[(1, 1), (2, 2)]);
        let new = view(&[(1, 1, true), (3, 2, true)]);
        let notice = RankChangeNotice::between(5, &old, Some(2), &new);

        assert_eq!(
            notice.project_rank_changes,
            vec![
                ProjectRankChange {
                    project_id: ProjectId::new(2),
                    old_rank: Some(2),
                    new_rank: None,
                },
                ProjectRankChange {
                    project_id: ProjectId::new(3),
                    old_rank: None,
                    new_rank: Some(2),
                },
            ]
        );
    }

    #[test]
    fn bottom_rank_ignores_ineligible_projects() {
        let new = view(&[(1, 1, true), (2, 2, true), (3, 3, false)]);
        let notice = RankChangeNotice::between(3, &previous(&[]), None, &new);
        assert_eq!(notice.old_bottom_rank, None);
        assert_eq!(notice.new_bottom_rank, Some(2));
    }

    #[test]
    fn identical_rankings_are_unchanged() {
        let old = previous(&[(1, 1), (2, 2)]);
        let new = view(&[(1, 1, true), (2, 2, true)]);
        assert!(RankChangeNotice::between(2, &old, Some(2), &new).is_unchanged());
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let notice = RankChangeNotice::between(
            2,
            &previous(&[(1, 2)]),
            Some(2),
            &view(&[(1, 1, true)]),
        );
        let json = serde_json::to_string(&notice).unwrap_or_default();
        assert!(json.contains("\"oldBottomRank\":2"));
        assert!(json.contains("\"projectRankChanges\""));
        assert!(json.contains("\"newRank\":1"));
    }
}
