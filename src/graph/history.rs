//! read-only traversal of parent chains.
//!
//! the walker works on a single point-in-time copy of a database's commit
//! list, so any number of walks can run side by side without locking. a
//! parent pointer that leads nowhere is always `BrokenHistory`, never a
//! silent "not found".

use std::collections::HashSet;

use crate::graph::commit::{Commit, CommitList};
use crate::graph::error::{GraphError, GraphResult};
use crate::graph::refs::BranchLedger;
use crate::graph::types::{BranchName, CommitId};

/// walks parent chains over a borrowed commit list
#[derive(Debug, Clone, Copy)]
pub struct HistoryWalker<'a> {
    commits: &'a CommitList,
}

impl<'a> HistoryWalker<'a> {
    pub fn new(commits: &'a CommitList) -> Self {
        Self { commits }
    }

    /// iterate from `head` toward the root
    pub fn walk(&self, head: CommitId) -> History<'a> {
        History {
            commits: self.commits,
            next: Some(head),
            origin: head,
            seen: HashSet::new(),
        }
    }

    /// number of commits reachable from `head` by following parents
    pub fn count_from_head(&self, head: CommitId) -> GraphResult<u64> {
        let mut count = 0;
        for commit in self.walk(head) {
            commit?;
            count += 1;
        }
        Ok(count)
    }

    /// IDs from `head` back to the root, head first
    pub fn ids_from_head(&self, head: CommitId) -> GraphResult<Vec<CommitId>> {
        self.walk(head).map(|c| c.map(|c| c.id)).collect()
    }

    /// check whether `candidate` is the head of `branch` or one of its ancestors
    pub fn is_ancestor_of_branch_head(
        &self,
        candidate: &CommitId,
        branch: &BranchName,
        ledger: &BranchLedger,
    ) -> GraphResult<bool> {
        let head = ledger
            .get(branch)
            .ok_or_else(|| GraphError::branch_not_found(branch))?
            .commit;

        for commit in self.walk(head) {
            if commit?.id == *candidate {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// iterator over a commit chain, head first
pub struct History<'a> {
    commits: &'a CommitList,
    next: Option<CommitId>,
    origin: CommitId,
    seen: HashSet<CommitId>,
}

impl<'a> Iterator for History<'a> {
    type Item = GraphResult<&'a Commit>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next.take()?;

        // a cycle can only come from a corrupt list, treat it like a dangling pointer
        if !self.seen.insert(id) {
            tracing::error!(commit = %id, head = %self.origin, "cycle in commit history");
            return Some(Err(GraphError::BrokenHistory {
                missing: id,
                reached_from: format!("cycle below {}", self.origin),
            }));
        }

        match self.commits.get(&id) {
            Some(commit) => {
                self.next = commit.parent;
                Some(Ok(commit))
            }
            None => {
                tracing::error!(commit = %id, head = %self.origin, "broken commit history");
                Some(Err(GraphError::BrokenHistory {
                    missing: id,
                    reached_from: format!("head {}", self.origin),
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::commit::tests::make_commit;
    use crate::graph::refs::BranchEntry;

    fn chain() -> (CommitList, Vec<CommitId>) {
        let c1 = make_commit(None, "one");
        let c2 = make_commit(Some(c1.id), "two");
        let c3 = make_commit(Some(c2.id), "three");
        let ids = vec![c1.id, c2.id, c3.id];
        (vec![c1, c2, c3].into_iter().collect(), ids)
    }

    #[test]
    fn test_count_from_head() {
        let (list, ids) = chain();
        let walker = HistoryWalker::new(&list);
        assert_eq!(walker.count_from_head(ids[2]).unwrap(), 3);
        assert_eq!(walker.count_from_head(ids[0]).unwrap(), 1);
    }

    #[test]
    fn test_ids_from_head_order() {
        let (list, ids) = chain();
        let walked = HistoryWalker::new(&list).ids_from_head(ids[2]).unwrap();
        assert_eq!(walked, vec![ids[2], ids[1], ids[0]]);
    }

    #[test]
    fn test_missing_parent_is_broken_history() {
        let (mut list, ids) = chain();
        list.remove(&ids[1]);
        let walker = HistoryWalker::new(&list);
        let err = walker.count_from_head(ids[2]).unwrap_err();
        assert!(matches!(err, GraphError::BrokenHistory { missing, .. } if missing == ids[1]));
    }

    #[test]
    fn test_missing_head_is_broken_history() {
        let (list, _) = chain();
        let stray = make_commit(None, "never stored");
        let err = HistoryWalker::new(&list).count_from_head(stray.id).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn test_is_ancestor_of_branch_head() {
        let (list, ids) = chain();
        let side = make_commit(Some(ids[0]), "side");
        let mut list = list;
        list.insert(side.clone());

        let mut ledger = BranchLedger::new();
        ledger.insert(BranchName::new("master").unwrap(), BranchEntry::new(ids[2], 3));
        ledger.insert(BranchName::new("side").unwrap(), BranchEntry::new(side.id, 2));

        let walker = HistoryWalker::new(&list);
        let master = BranchName::new("master").unwrap();
        let side_branch = BranchName::new("side").unwrap();

        // head itself counts
        assert!(walker.is_ancestor_of_branch_head(&ids[2], &master, &ledger).unwrap());
        assert!(walker.is_ancestor_of_branch_head(&ids[0], &side_branch, &ledger).unwrap());
        assert!(!walker.is_ancestor_of_branch_head(&ids[2], &side_branch, &ledger).unwrap());

        let missing = BranchName::new("nope").unwrap();
        assert!(walker
            .is_ancestor_of_branch_head(&ids[0], &missing, &ledger)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_ancestor_walk_through_gap_is_error_not_false() {
        let (mut list, ids) = chain();
        list.remove(&ids[1]);
        let mut ledger = BranchLedger::new();
        let master = BranchName::new("master").unwrap();
        ledger.insert(master.clone(), BranchEntry::new(ids[2], 3));

        let result = HistoryWalker::new(&list).is_ancestor_of_branch_head(&ids[0], &master, &ledger);
        assert!(matches!(result, Err(GraphError::BrokenHistory { .. })));
    }
}
