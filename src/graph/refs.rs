//! Branch ledger: branch name -> head commit + cached commit count.
//!
//! The cached count must always equal the length of the chain from the head
//! back to the root. Every mutation here recomputes or derives it from the
//! commit list; it is never carried over blindly.
//!
//! Rollback is split in two: `plan_rollback` works out everything that will
//! change without touching anything, and `apply_rollback` performs it. The
//! caller runs both inside one store transaction so the head move and the
//! garbage collection land together or not at all.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::graph::commit::{Commit, CommitList};
use crate::graph::error::{GraphError, GraphResult};
use crate::graph::history::HistoryWalker;
use crate::graph::types::{BranchName, CommitId};

/// head of one branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchEntry {
    pub commit: CommitId,
    pub commit_count: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl BranchEntry {
    pub fn new(commit: CommitId, commit_count: u64) -> Self {
        Self {
            commit,
            commit_count,
            description: String::new(),
        }
    }
}

/// all branch heads of one database
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchLedger(BTreeMap<BranchName, BranchEntry>);

impl BranchLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, branch: &BranchName) -> Option<&BranchEntry> {
        self.0.get(branch)
    }

    pub fn contains(&self, branch: &BranchName) -> bool {
        self.0.contains_key(branch)
    }

    pub fn insert(&mut self, branch: BranchName, entry: BranchEntry) {
        self.0.insert(branch, entry);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BranchName, &BranchEntry)> {
        self.0.iter()
    }

    /// Move `branch` to `commit`, creating the branch if needed.
    ///
    /// `commit` must already be in `commits`. A push of exactly one commit on
    /// top of the current head bumps the count; anything else (new branch,
    /// explicit older parent) recounts from the new head.
    pub fn advance(
        &mut self,
        branch: &BranchName,
        commit: &Commit,
        commits: &CommitList,
    ) -> GraphResult<&BranchEntry> {
        let count = match (self.0.get(branch), commit.parent) {
            (Some(entry), Some(parent)) if parent == entry.commit => entry.commit_count + 1,
            _ => HistoryWalker::new(commits).count_from_head(commit.id)?,
        };

        let entry = self
            .0
            .entry(branch.clone())
            .or_insert_with(|| BranchEntry::new(commit.id, count));
        entry.commit = commit.id;
        entry.commit_count = count;

        tracing::debug!(branch = %branch, head = %commit.id, count, "branch advanced");
        Ok(entry)
    }

    /// work out what removing the head commit of `branch` will change
    pub fn plan_rollback(
        &self,
        branch: &BranchName,
        commits: &CommitList,
    ) -> GraphResult<RollbackPlan> {
        let entry = self
            .get(branch)
            .ok_or_else(|| GraphError::branch_not_found(branch))?;

        let head = commits.get(&entry.commit).ok_or_else(|| {
            tracing::error!(branch = %branch, head = %entry.commit, "branch head missing from commit list");
            GraphError::commit_not_found(&entry.commit)
        })?;

        let parent = head.parent.ok_or_else(|| {
            GraphError::InvariantViolation(format!(
                "refusing to remove the only remaining commit of branch '{}'",
                branch
            ))
        })?;

        let walker = HistoryWalker::new(commits);
        let mut shared_with = Vec::new();
        for (name, _) in self.iter().filter(|(name, _)| *name != branch) {
            if walker.is_ancestor_of_branch_head(&head.id, name, self)? {
                shared_with.push(name.clone());
            }
        }

        Ok(RollbackPlan {
            branch: branch.clone(),
            removed: head.id,
            new_head: parent,
            new_count: walker.count_from_head(parent)?,
            shared_with,
        })
    }

    /// move the head back and drop the commit if no other branch reaches it
    pub fn apply_rollback(&mut self, plan: &RollbackPlan, commits: &mut CommitList) {
        if let Some(entry) = self.0.get_mut(&plan.branch) {
            entry.commit = plan.new_head;
            entry.commit_count = plan.new_count;
        }
        if plan.collects_garbage() {
            commits.remove(&plan.removed);
        }
    }
}

/// the effect of removing the head commit of a branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackPlan {
    pub branch: BranchName,
    /// the commit taken off the branch
    pub removed: CommitId,
    /// its parent, the branch's new head
    pub new_head: CommitId,
    pub new_count: u64,
    /// other branches that still reach the removed commit
    pub shared_with: Vec<BranchName>,
}

impl RollbackPlan {
    /// the removed commit leaves the commit list
    pub fn collects_garbage(&self) -> bool {
        self.shared_with.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::commit::tests::make_commit;

    fn master() -> BranchName {
        BranchName::new("master").unwrap()
    }

    /// C1 <- C2 <- C3 on master
    fn linear() -> (BranchLedger, CommitList, Vec<Commit>) {
        let c1 = make_commit(None, "one");
        let c2 = make_commit(Some(c1.id), "two");
        let c3 = make_commit(Some(c2.id), "three");
        let mut commits = CommitList::new();
        let mut ledger = BranchLedger::new();
        for c in [&c1, &c2, &c3] {
            commits.insert(c.clone());
            ledger.advance(&master(), c, &commits).unwrap();
        }
        (ledger, commits, vec![c1, c2, c3])
    }

    fn assert_counts_match(ledger: &BranchLedger, commits: &CommitList) {
        let walker = HistoryWalker::new(commits);
        for (name, entry) in ledger.iter() {
            assert_eq!(
                entry.commit_count,
                walker.count_from_head(entry.commit).unwrap(),
                "count drifted on {}",
                name
            );
        }
    }

    #[test]
    fn test_advance_counts() {
        let (ledger, commits, c) = linear();
        let head = ledger.get(&master()).unwrap();
        assert_eq!(head.commit, c[2].id);
        assert_eq!(head.commit_count, 3);
        assert_counts_match(&ledger, &commits);
    }

    #[test]
    fn test_advance_new_branch_recounts() {
        let (mut ledger, mut commits, c) = linear();
        let side = make_commit(Some(c[1].id), "side");
        commits.insert(side.clone());
        let entry = ledger
            .advance(&BranchName::new("side").unwrap(), &side, &commits)
            .unwrap();
        assert_eq!(entry.commit_count, 3);
        assert_counts_match(&ledger, &commits);
    }

    #[test]
    fn test_advance_from_older_parent_recounts() {
        let (mut ledger, mut commits, c) = linear();
        let rewrite = make_commit(Some(c[0].id), "rewrite");
        commits.insert(rewrite.clone());
        let entry = ledger.advance(&master(), &rewrite, &commits).unwrap();
        assert_eq!(entry.commit_count, 2);
    }

    #[test]
    fn test_rollback_removes_unshared_head() {
        let (mut ledger, mut commits, c) = linear();
        let plan = ledger.plan_rollback(&master(), &commits).unwrap();
        assert_eq!(plan.removed, c[2].id);
        assert_eq!(plan.new_head, c[1].id);
        assert_eq!(plan.new_count, 2);
        assert!(plan.collects_garbage());

        ledger.apply_rollback(&plan, &mut commits);
        assert_eq!(ledger.get(&master()).unwrap().commit, c[1].id);
        assert!(!commits.contains(&c[2].id));
        assert_eq!(commits.len(), 2);
        assert_counts_match(&ledger, &commits);
    }

    #[test]
    fn test_rollback_keeps_commit_shared_with_other_branch() {
        let (mut ledger, mut commits, c) = linear();
        let other = BranchName::new("other").unwrap();
        ledger.advance(&other, &c[2], &commits).unwrap();

        let plan = ledger.plan_rollback(&master(), &commits).unwrap();
        assert_eq!(plan.shared_with, vec![other.clone()]);
        assert!(!plan.collects_garbage());

        ledger.apply_rollback(&plan, &mut commits);
        assert!(commits.contains(&c[2].id));
        assert_eq!(ledger.get(&other).unwrap().commit, c[2].id);
        assert_eq!(ledger.get(&master()).unwrap().commit_count, 2);
        assert_counts_match(&ledger, &commits);
    }

    #[test]
    fn test_rollback_keeps_commit_that_is_ancestor_elsewhere() {
        let (mut ledger, mut commits, c) = linear();
        let child = make_commit(Some(c[2].id), "four");
        commits.insert(child.clone());
        let feature = BranchName::new("feature").unwrap();
        ledger.advance(&feature, &child, &commits).unwrap();

        let plan = ledger.plan_rollback(&master(), &commits).unwrap();
        assert_eq!(plan.shared_with, vec![feature]);
        ledger.apply_rollback(&plan, &mut commits);
        assert!(commits.contains(&c[2].id));
        assert_counts_match(&ledger, &commits);
    }

    #[test]
    fn test_rollback_of_root_commit_rejected() {
        let c1 = make_commit(None, "only");
        let mut commits = CommitList::new();
        commits.insert(c1.clone());
        let mut ledger = BranchLedger::new();
        ledger.advance(&master(), &c1, &commits).unwrap();

        let before = ledger.clone();
        let err = ledger.plan_rollback(&master(), &commits).unwrap_err();
        assert!(matches!(err, GraphError::InvariantViolation(_)));
        assert_eq!(ledger, before);
        assert!(commits.contains(&c1.id));
    }

    #[test]
    fn test_rollback_unknown_branch() {
        let (ledger, commits, _) = linear();
        let err = ledger
            .plan_rollback(&BranchName::new("ghost").unwrap(), &commits)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_rollback_with_head_missing_from_list() {
        let (ledger, mut commits, c) = linear();
        commits.remove(&c[2].id);
        let err = ledger.plan_rollback(&master(), &commits).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_ledger_json_shape() {
        let (ledger, _, c) = linear();
        let json = serde_json::to_value(&ledger).unwrap();
        assert_eq!(json["master"]["commit"], c[2].id.to_hex());
        assert_eq!(json["master"]["commit_count"], 3);
        let back: BranchLedger = serde_json::from_value(json).unwrap();
        assert_eq!(back, ledger);
    }
}
