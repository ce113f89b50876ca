//! Shared wire types for the `zax` check runner.
//!
//! This library defines the types that cross process boundaries: the
//! `artifacts/v1` manifest schema, the backend RPC bodies, and the engine
//! HTTP bodies. Keeping them in one place means the CLI, the engine, and the
//! backend can never drift apart on the shapes they exchange.
//!
//! ## Use of `#[non_exhaustive]`
//!
//! We use `#[non_exhaustive]` on structs that carry invariants to prevent
//! users manually constructing them while still allowing their fields to be
//! `pub` for reading. Construct such types through:
//! - Constructors on the types
//! - Builder methods
//! - Deserialization

use std::{fmt, path::Path, str::FromStr};

use color_eyre::eyre::bail;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tap::Pipe;

pub mod artifacts;
pub mod check;
pub mod rpc;

/// A stable identifier for a workspace.
///
/// Computed as the first 16 hex characters of the BLAKE3 hash of the
/// canonicalized workspace root path. This is a local cache key, not a
/// security boundary: the only property we rely on is that the same
/// canonical root always produces the same id.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct WorkspaceId(String);

impl WorkspaceId {
    /// Compute the id for a canonicalized workspace root.
    ///
    /// Callers are expected to have resolved symlinks already; this function
    /// hashes the path bytes as given.
    pub fn for_root(root: impl AsRef<Path>) -> Self {
        let hash = blake3::hash(root.as_ref().as_os_str().as_encoded_bytes());
        let encoded = hex::encode(hash.as_bytes());
        Self(encoded[..16].to_string())
    }

    /// View the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for WorkspaceId {
    type Err = color_eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !lazy_regex::regex_is_match!(r"^[0-9a-f]{16}$", s) {
            bail!("workspace id must be 16 lowercase hex characters, got {s:?}");
        }
        String::from(s).pipe(Self).pipe(Ok)
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkspaceId({})", self.0)
    }
}

impl Serialize for WorkspaceId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for WorkspaceId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq as pretty_assert_eq;
    use proptest::prelude::*;

    #[test]
    fn id_is_stable_for_same_root() {
        let a = WorkspaceId::for_root("/home/dev/project");
        let b = WorkspaceId::for_root("/home/dev/project");
        pretty_assert_eq!(a, b);
    }

    #[test]
    fn id_differs_for_different_roots() {
        let a = WorkspaceId::for_root("/home/dev/project");
        let b = WorkspaceId::for_root("/home/dev/other");
        assert_ne!(a, b);
    }

    #[test]
    fn id_shape() {
        let id = WorkspaceId::for_root("/home/dev/project");
        assert!(lazy_regex::regex_is_match!(r"^[0-9a-f]{16}$", id.as_str()));
    }

    #[test]
    fn round_trips_through_serde() {
        let id = WorkspaceId::for_root("/home/dev/project");
        let json = serde_json::to_string(&id).unwrap();
        let back = serde_json::from_str::<WorkspaceId>(&json).unwrap();
        pretty_assert_eq!(id, back);
    }

    proptest! {
        #[test]
        fn only_16_lowercase_hex_parses(s in "\\PC*") {
            let expected = lazy_regex::regex_is_match!(r"^[0-9a-f]{16}$", &s);
            prop_assert_eq!(s.parse::<WorkspaceId>().is_ok(), expected);
        }

        #[test]
        fn all_valid_ids_parse(s in "[0-9a-f]{16}") {
            prop_assert!(s.parse::<WorkspaceId>().is_ok());
        }
    }
}
