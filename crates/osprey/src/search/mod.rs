//
// search/mod.rs
//
// Workspace file search: glob expressions, fuzzy name matching, the
// filesystem walker and the search engine that drives it over the
// wire protocol.
//

pub mod engine;
pub mod fuzzy;
pub mod glob;
pub mod walker;

pub use engine::SearchEngine;
pub use glob::GlobExpression;
pub use walker::{FileMatch, FileWalker, SearchQuery, WalkOutcome};
