// lib.rs — Exposes internal modules for integration tests.
//
// The binary entry point lives in main.rs and runs the LSP server over
// stdio; everything else is library code so tests/ can reach it.

pub mod backend;
pub mod document;
pub mod embedded;
pub mod engine;
pub mod host;
pub mod line_map;
pub mod mode;
pub mod model_cache;
pub mod search;
