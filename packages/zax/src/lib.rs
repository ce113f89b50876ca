//! Library for `zax`.
//!
//! This library is not intended to be used directly and is unsupported in
//! that configuration. It's only a library to enable sharing code between
//! the `zax` binary and integration tests in the `zax` repository.

pub mod cache;
pub mod check;
pub mod client;
pub mod daemon;
pub mod fs;
pub mod lock;
pub mod path;
pub mod runner;
pub mod workspace;
