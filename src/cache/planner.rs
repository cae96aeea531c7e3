//! Invalidation plan generation.
//!
//! Merges a batch of tree change payloads into the minimal set of actions.

use std::collections::HashMap;
use std::fmt;

use super::events::{TreeChange, TreeChangePayload};

/// Action for one node after merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChange {
    pub id: i32,
    pub change: TreeChange,
    /// Explicit descendants collected from every merged payload.
    pub descendant_ids: Option<Vec<i32>>,
}

/// Merged actions for one batch of tree payloads.
///
/// - `RefreshAll` anywhere in the batch supersedes everything else
/// - one action per node id, in order of first appearance
/// - a later `Remove` beats an earlier refresh of the same node
/// - a refresh after a `Remove` reloads the node (it may have been recreated)
/// - a branch refresh subsumes a node refresh of the same node
#[derive(Debug, Default, PartialEq, Eq)]
pub struct InvalidationPlan {
    pub refresh_all: bool,
    pub changes: Vec<PlannedChange>,
}

impl fmt::Display for InvalidationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = |change: TreeChange| {
            self.changes
                .iter()
                .filter(|planned| planned.change == change)
                .count()
        };
        write!(
            f,
            "InvalidationPlan {{ refresh_all: {}, refresh_node: {}, refresh_branch: {}, remove: {} }}",
            self.refresh_all,
            count(TreeChange::RefreshNode),
            count(TreeChange::RefreshBranch),
            count(TreeChange::Remove),
        )
    }
}

impl InvalidationPlan {
    pub fn from_content_payloads(payloads: &[TreeChangePayload]) -> Self {
        if payloads
            .iter()
            .any(|payload| payload.change == TreeChange::RefreshAll)
        {
            return Self {
                refresh_all: true,
                changes: Vec::new(),
            };
        }

        let mut plan = Self::default();
        let mut positions: HashMap<i32, usize> = HashMap::new();

        for payload in payloads {
            let Some(&position) = positions.get(&payload.id) else {
                positions.insert(payload.id, plan.changes.len());
                plan.changes.push(PlannedChange {
                    id: payload.id,
                    change: payload.change,
                    descendant_ids: payload.descendant_ids.clone(),
                });
                continue;
            };

            let planned = &mut plan.changes[position];
            planned.change = merge(planned.change, payload.change);
            if let Some(ids) = &payload.descendant_ids {
                let merged = planned.descendant_ids.get_or_insert_with(Vec::new);
                for id in ids {
                    if !merged.contains(id) {
                        merged.push(*id);
                    }
                }
            }
        }

        plan
    }

    pub fn is_empty(&self) -> bool {
        !self.refresh_all && self.changes.is_empty()
    }
}

fn merge(earlier: TreeChange, later: TreeChange) -> TreeChange {
    use TreeChange::{RefreshAll, RefreshBranch, RefreshNode, Remove};

    match (earlier, later) {
        (_, Remove) => Remove,
        (Remove, refresh) => refresh,
        (RefreshBranch, _) | (_, RefreshBranch) => RefreshBranch,
        (RefreshAll, _) | (_, RefreshAll) => RefreshAll,
        (RefreshNode, RefreshNode) => RefreshNode,
    }
}
