use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unit of work handed to an anonymous polling worker.
///
/// The `lease` is an opaque token minted at dispatch time. Workers echo it on
/// submit and reset; the server only honors calls whose lease matches the
/// current assignment, so a confused or stale worker cannot release somebody
/// else's task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Task {
    /// Fetch the authoritative per-hero performance totals for one account.
    #[serde(rename_all = "camelCase")]
    FetchHeroStats {
        account_id: i64,
        depth: i32,
        lease: Uuid,
    },
    /// Page through the account's match history and report every account id
    /// encountered, resuming after the watermark.
    #[serde(rename_all = "camelCase")]
    DiscoverMatches {
        account_id: i64,
        depth: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        highest_match_id: Option<i64>,
        lease: Uuid,
    },
    /// Compound re-crawl of a completed account: discovery first, hero stats
    /// second, both halves under the same lease.
    #[serde(rename_all = "camelCase")]
    RefreshAccount {
        account_id: i64,
        depth: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        highest_match_id: Option<i64>,
        lease: Uuid,
    },
}

impl Task {
    pub fn account_id(&self) -> i64 {
        match self {
            Task::FetchHeroStats { account_id, .. }
            | Task::DiscoverMatches { account_id, .. }
            | Task::RefreshAccount { account_id, .. } => *account_id,
        }
    }

    pub fn lease(&self) -> Uuid {
        match self {
            Task::FetchHeroStats { lease, .. }
            | Task::DiscoverMatches { lease, .. }
            | Task::RefreshAccount { lease, .. } => *lease,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hero_task_wire_shape() {
        let lease = Uuid::new_v4();
        let task = Task::FetchHeroStats {
            account_id: 293053907,
            depth: 0,
            lease,
        };
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["type"], "fetch_hero_stats");
        assert_eq!(json["accountId"], 293053907i64);
        assert_eq!(json["depth"], 0);
        assert_eq!(json["lease"], lease.to_string());
    }

    #[test]
    fn discovery_task_omits_missing_watermark() {
        let task = Task::DiscoverMatches {
            account_id: 1,
            depth: 2,
            highest_match_id: None,
            lease: Uuid::new_v4(),
        };
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["type"], "discover_matches");
        assert!(json.get("highestMatchId").is_none());
    }

    #[test]
    fn refresh_task_round_trips() {
        let task = Task::RefreshAccount {
            account_id: 42,
            depth: 1,
            highest_match_id: Some(7_700_000_001),
            lease: Uuid::new_v4(),
        };
        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back, task);
    }
}
