//! Fork lineage between hosted databases.
//!
//! - `registry`: creating forks, single-hop parent lookup, reading a forest
//! - `render`: display order and tree glyphs for a forest

pub mod registry;
pub mod render;

pub use registry::{fork, fork_set, forked_from, ForkEntry, ForkOutcome, ForkSet};
pub use render::{render_fork_tree, render_text, ForkGlyph, RenderedFork};
