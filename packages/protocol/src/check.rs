//! Request and response bodies for the engine's HTTP surface.

pub mod v1;
