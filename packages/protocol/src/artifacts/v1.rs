use std::path::PathBuf;

use bon::Builder;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::WorkspaceId;

/// The kind of tool output an artifact file contains.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ArtifactKind {
    /// A test-runner JSON report; parsed into test failure rows.
    #[serde(rename = "TEST_FAILURE")]
    TestFailure,

    /// A linter JSON report; parsed into finding rows.
    #[serde(rename = "FINDING")]
    Finding,
}

/// One tool output file produced during a check run.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct Artifact {
    /// Identifier of the artifact within its run, e.g. `<run_id>-vitest`.
    pub artifact_id: String,

    pub kind: ArtifactKind,

    /// Absolute path of the artifact file. The backend only accepts paths
    /// inside its own `artifacts/<run_id>/` directory.
    #[builder(into)]
    pub path: PathBuf,

    /// Hex-encoded BLAKE3 hash of the file content, verified before parsing.
    pub hash: String,
}

/// The set of artifacts produced by one check run.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, Builder)]
pub struct ArtifactManifest {
    pub workspace_id: WorkspaceId,
    pub run_id: Uuid,
    pub artifacts: Vec<Artifact>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq as pretty_assert_eq;

    #[test]
    fn kind_wire_names() {
        let test = serde_json::to_string(&ArtifactKind::TestFailure).unwrap();
        let finding = serde_json::to_string(&ArtifactKind::Finding).unwrap();
        pretty_assert_eq!(test, r#""TEST_FAILURE""#);
        pretty_assert_eq!(finding, r#""FINDING""#);
    }

    #[test]
    fn manifest_round_trip() {
        let run_id = Uuid::new_v4();
        let manifest = ArtifactManifest::builder()
            .workspace_id(WorkspaceId::for_root("/w"))
            .run_id(run_id)
            .artifacts(vec![
                Artifact::builder()
                    .artifact_id(format!("{run_id}-vitest"))
                    .kind(ArtifactKind::TestFailure)
                    .path("/cache/artifacts/run/vitest.json")
                    .hash("abc123")
                    .build(),
            ])
            .build();

        let json = serde_json::to_string(&manifest).unwrap();
        let back = serde_json::from_str::<ArtifactManifest>(&json).unwrap();
        pretty_assert_eq!(manifest, back);
    }
}
