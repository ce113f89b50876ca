//! Library for `zax-store`, the artifact store backend.
//!
//! The backend owns the per-workspace SQLite database of check runs and
//! serves the unary RPC surface the engine calls: ingest, delta summaries,
//! and affected-test selection.

pub mod affected;
pub mod api;
pub mod db;
pub mod ingest;
