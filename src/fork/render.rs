//! fork tree renderer.
//!
//! turns the unordered rows of one fork forest into display order: depth
//! first, pre-order, children in input order. glyphs come straight from the
//! adjacency list, a column `j` of a row is a stem when the row's ancestor at
//! depth `j` still has a sibling to come.
//!
//! ```text
//! alice/stats.sqlite
//!   ├─ bob/stats.sqlite
//!   │ └─ carol/stats.sqlite
//!   └─ dave/stats.sqlite
//! ```

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::fork::registry::ForkEntry;
use crate::graph::error::{GraphError, GraphResult};
use crate::graph::types::{DatabaseId, OwnerName};

const PRIVATE_PLACEHOLDER: &str = "private database";
const DELETED_PLACEHOLDER: &str = "deleted database";

/// one column of the tree drawing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ForkGlyph {
    Root,
    Space,
    Stem,
    Branch,
    End,
}

impl ForkGlyph {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForkGlyph::Root => "",
            ForkGlyph::Space => "  ",
            ForkGlyph::Stem => "│ ",
            ForkGlyph::Branch => "├─",
            ForkGlyph::End => "└─",
        }
    }
}

/// a display row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedFork {
    pub id: DatabaseId,
    pub owner: OwnerName,
    /// real name, or a placeholder the viewer may not look behind
    pub name: String,
    pub depth: usize,
    pub glyphs: Vec<ForkGlyph>,
    pub is_placeholder: bool,
}

struct Visit {
    index: usize,
    depth: usize,
    has_later_sibling: bool,
}

/// Order and decorate the rows of one fork forest.
///
/// `entries` must contain exactly one root (no `forked_from`) and no ID
/// twice, anything else is `MalformedForkSet`. Rows whose parent chain never
/// reaches the root are logged and left out.
pub fn render_fork_tree(
    entries: &[ForkEntry],
    viewer: Option<&OwnerName>,
) -> GraphResult<Vec<RenderedFork>> {
    let mut ids = HashSet::with_capacity(entries.len());
    for entry in entries {
        if !ids.insert(entry.id) {
            return Err(GraphError::MalformedForkSet(format!(
                "database {} appears more than once",
                entry.id
            )));
        }
    }

    let mut roots = entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.forked_from.is_none());
    let root = match (roots.next(), roots.next()) {
        (Some((index, _)), None) => index,
        (None, _) => return Err(GraphError::MalformedForkSet("no root database".into())),
        (Some((_, a)), Some((_, b))) => {
            return Err(GraphError::MalformedForkSet(format!(
                "more than one root database ({} and {})",
                a.id, b.id
            )))
        }
    };

    let mut children: HashMap<DatabaseId, Vec<usize>> = HashMap::new();
    for (index, entry) in entries.iter().enumerate() {
        if let Some(parent) = entry.forked_from {
            children.entry(parent).or_default().push(index);
        }
    }

    let mut rows = Vec::with_capacity(entries.len());
    let mut emitted = vec![false; entries.len()];
    // open[d]: the last row emitted at depth d has a sibling still to come
    let mut open: Vec<bool> = Vec::new();
    let mut stack = vec![Visit {
        index: root,
        depth: 0,
        has_later_sibling: false,
    }];

    while let Some(visit) = stack.pop() {
        let entry = &entries[visit.index];
        emitted[visit.index] = true;

        open.truncate(visit.depth);
        let glyphs = glyphs_for(&open, visit.depth, visit.has_later_sibling);
        open.push(visit.has_later_sibling);
        rows.push(display_row(entry, visit.depth, glyphs, viewer));

        if let Some(kids) = children.get(&entry.id) {
            for (n, &child) in kids.iter().enumerate().rev() {
                stack.push(Visit {
                    index: child,
                    depth: visit.depth + 1,
                    has_later_sibling: n + 1 < kids.len(),
                });
            }
        }
    }

    for (entry, _) in entries.iter().zip(&emitted).filter(|(_, done)| !**done) {
        tracing::error!(
            database = %entry.id,
            forked_from = ?entry.forked_from.map(|id| id.get()),
            "fork entry unreachable from root, omitted"
        );
    }

    Ok(rows)
}

fn glyphs_for(open: &[bool], depth: usize, has_later_sibling: bool) -> Vec<ForkGlyph> {
    if depth == 0 {
        return vec![ForkGlyph::Root];
    }
    let mut glyphs = Vec::with_capacity(depth + 1);
    glyphs.push(ForkGlyph::Space);
    for column in 1..depth {
        if open.get(column).copied().unwrap_or(false) {
            glyphs.push(ForkGlyph::Stem);
        } else {
            glyphs.push(ForkGlyph::Space);
        }
    }
    glyphs.push(if has_later_sibling {
        ForkGlyph::Branch
    } else {
        ForkGlyph::End
    });
    glyphs
}

fn display_row(
    entry: &ForkEntry,
    depth: usize,
    glyphs: Vec<ForkGlyph>,
    viewer: Option<&OwnerName>,
) -> RenderedFork {
    let placeholder = if entry.deleted {
        Some(DELETED_PLACEHOLDER)
    } else if !entry.public && viewer != Some(&entry.owner) {
        Some(PRIVATE_PLACEHOLDER)
    } else {
        None
    };

    RenderedFork {
        id: entry.id,
        owner: entry.owner.clone(),
        name: placeholder
            .map(str::to_string)
            .unwrap_or_else(|| entry.name.to_string()),
        depth,
        glyphs,
        is_placeholder: placeholder.is_some(),
    }
}

/// draw rendered rows as text, one line per row
pub fn render_text(rows: &[RenderedFork]) -> String {
    let mut out = String::new();
    for row in rows {
        for glyph in &row.glyphs {
            out.push_str(glyph.as_str());
        }
        if row.depth > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{}/{}\n", row.owner, row.name));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::types::DatabaseName;
    use ForkGlyph::*;

    fn entry(id: i64, owner: &str, forked_from: Option<i64>) -> ForkEntry {
        ForkEntry {
            id: DatabaseId::new(id),
            owner: OwnerName::new(owner).unwrap(),
            name: DatabaseName::new("stats.sqlite").unwrap(),
            forked_from: forked_from.map(DatabaseId::new),
            public: true,
            deleted: false,
        }
    }

    fn ids(rows: &[RenderedFork]) -> Vec<i64> {
        rows.iter().map(|r| r.id.get()).collect()
    }

    /// R <- A <- C, R <- B, listed in creation order R, A, B, C
    fn rabc() -> Vec<ForkEntry> {
        vec![
            entry(1, "alice", None),
            entry(2, "bob", Some(1)),
            entry(3, "dave", Some(1)),
            entry(4, "carol", Some(2)),
        ]
    }

    #[test]
    fn test_root_first_and_depths() {
        let rows = render_fork_tree(&rabc(), None).unwrap();
        assert_eq!(ids(&rows), vec![1, 2, 4, 3]);
        let depths: Vec<_> = rows.iter().map(|r| r.depth).collect();
        assert_eq!(depths, vec![0, 1, 2, 1]);
    }

    #[test]
    fn test_glyphs() {
        let rows = render_fork_tree(&rabc(), None).unwrap();
        assert_eq!(rows[0].glyphs, vec![Root]);
        assert_eq!(rows[1].glyphs, vec![Space, Branch]);
        assert_eq!(rows[2].glyphs, vec![Space, Stem, End]);
        assert_eq!(rows[3].glyphs, vec![Space, End]);
    }

    #[test]
    fn test_root_position_in_input_does_not_matter() {
        let mut shuffled = rabc();
        shuffled.rotate_left(2);
        let rows = render_fork_tree(&shuffled, None).unwrap();
        assert_eq!(rows[0].id.get(), 1);
        assert_eq!(rows.len(), 4);
    }

    #[test]
    fn test_sibling_promotion() {
        let single = vec![entry(1, "alice", None), entry(2, "bob", Some(1))];
        let rows = render_fork_tree(&single, None).unwrap();
        assert_eq!(rows[1].glyphs, vec![Space, End]);

        let mut pair = single;
        pair.push(entry(3, "carol", Some(1)));
        let rows = render_fork_tree(&pair, None).unwrap();
        assert_eq!(rows[1].glyphs, vec![Space, Branch]);
        assert_eq!(rows[2].glyphs, vec![Space, End]);
    }

    #[test]
    fn test_stem_only_while_sibling_pending() {
        // R <- A <- A1 <- A11, R <- B
        let entries = vec![
            entry(1, "alice", None),
            entry(2, "bob", Some(1)),
            entry(3, "carol", Some(2)),
            entry(4, "dave", Some(3)),
            entry(5, "erin", Some(1)),
        ];
        let rows = render_fork_tree(&entries, None).unwrap();
        assert_eq!(ids(&rows), vec![1, 2, 3, 4, 5]);
        assert_eq!(rows[2].glyphs, vec![Space, Stem, End]);
        assert_eq!(rows[3].glyphs, vec![Space, Stem, Space, End]);
        assert_eq!(rows[4].glyphs, vec![Space, End]);
    }

    #[test]
    fn test_missing_root() {
        let entries = vec![entry(2, "bob", Some(1))];
        let err = render_fork_tree(&entries, None).unwrap_err();
        assert!(matches!(err, GraphError::MalformedForkSet(_)));
        assert!(render_fork_tree(&[], None).is_err());
    }

    #[test]
    fn test_two_roots() {
        let entries = vec![entry(1, "alice", None), entry(2, "bob", None)];
        let err = render_fork_tree(&entries, None).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn test_duplicate_ids() {
        let entries = vec![entry(1, "alice", None), entry(1, "alice", None)];
        assert!(matches!(
            render_fork_tree(&entries, None),
            Err(GraphError::MalformedForkSet(_))
        ));
    }

    #[test]
    fn test_orphans_are_omitted() {
        let mut entries = rabc();
        entries.push(entry(9, "mallory", Some(42)));
        entries.push(entry(10, "trent", Some(10)));
        let rows = render_fork_tree(&entries, None).unwrap();
        assert_eq!(ids(&rows), vec![1, 2, 4, 3]);
    }

    #[test]
    fn test_private_and_deleted_placeholders() {
        let mut entries = rabc();
        entries[0].public = false;
        entries[1].public = false;
        entries[3].deleted = true;

        let anonymous = render_fork_tree(&entries, None).unwrap();
        assert_eq!(anonymous[0].name, "private database");
        assert_eq!(anonymous[1].name, "private database");
        assert_eq!(anonymous[2].name, "deleted database");
        assert_eq!(anonymous[3].name, "stats.sqlite");
        assert!(anonymous[0].is_placeholder);
        assert!(!anonymous[3].is_placeholder);
        // shape is unchanged
        assert_eq!(anonymous[2].glyphs, vec![Space, Stem, End]);

        let bob = OwnerName::new("bob").unwrap();
        let as_bob = render_fork_tree(&entries, Some(&bob)).unwrap();
        assert_eq!(as_bob[0].name, "private database");
        assert_eq!(as_bob[1].name, "stats.sqlite");
        assert!(!as_bob[1].is_placeholder);

        let alice = OwnerName::new("alice").unwrap();
        let as_alice = render_fork_tree(&entries, Some(&alice)).unwrap();
        assert_eq!(as_alice[0].name, "stats.sqlite");
    }

    #[test]
    fn test_render_text() {
        let rows = render_fork_tree(&rabc(), None).unwrap();
        assert_eq!(
            render_text(&rows),
            "alice/stats.sqlite\n  ├─ bob/stats.sqlite\n  │ └─ carol/stats.sqlite\n  └─ dave/stats.sqlite\n"
        );
    }

    #[test]
    fn test_same_input_same_output() {
        let a = render_fork_tree(&rabc(), None).unwrap();
        let b = render_fork_tree(&rabc(), None).unwrap();
        assert_eq!(a, b);
    }
}
