//! The artifact manifest schema exchanged between the engine and the backend.

pub mod v1;
