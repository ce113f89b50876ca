//! Request and response bodies for the backend RPC service.

pub mod v1;
