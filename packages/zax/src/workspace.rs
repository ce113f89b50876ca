//! Workspace discovery.
//!
//! Given a starting directory, finds the workspace root (monorepo root or
//! VCS root), the optional package scope inside it, and the stable workspace
//! id derived from the root. Discovery is a pure function of the filesystem:
//! it reads marker files but never writes anything.

use color_eyre::{Result, eyre::Context};
use derive_more::Display;
use protocol::WorkspaceId;
use tap::Pipe;
use tracing::{debug, instrument, warn};

use crate::{
    fs,
    path::{AbsDirPath, RelativeTo as _, TryJoinWith as _},
};

/// Marker files whose presence makes a directory a monorepo root.
const MONOREPO_MARKERS: &[&str] = &["pnpm-workspace.yaml", "turbo.json", "lerna.json"];

/// A resolved workspace: the stable root, the package scope of the starting
/// directory (if any), and the id derived from the root.
///
/// The id is always computed from the root, never from the scope, so the
/// cache directory stays stable as developers move around inside a monorepo.
#[derive(Clone, Eq, PartialEq, Debug, Display)]
#[display("{root}")]
pub struct Workspace {
    pub root: AbsDirPath,

    /// Forward-slash path from the root to the nearest package-manifest
    /// directory at or above the starting directory. Absent when the start
    /// is the root itself or no intermediate manifest exists.
    pub package_scope: Option<String>,

    pub id: WorkspaceId,
}

impl Workspace {
    /// Discover the workspace containing `start`.
    ///
    /// Root selection walks the parent chain upward, remembering the nearest
    /// directory with a monorepo marker and the nearest VCS root. The root is
    /// the nearest monorepo-marker directory at or below the VCS root, else
    /// the VCS root, else the starting directory.
    #[instrument(name = "Workspace::discover")]
    pub async fn discover(start: &AbsDirPath) -> Result<Self> {
        let start = tokio::fs::canonicalize(start.as_std_path())
            .await
            .with_context(|| format!("canonicalize {start:?}"))?
            .pipe(AbsDirPath::try_from)?;

        let mut monorepo_root = None;
        let mut vcs_root = None;

        let mut cursor = Some(start.clone());
        while let Some(dir) = cursor {
            if monorepo_root.is_none() && is_monorepo_root(&dir).await? {
                monorepo_root = Some(dir.clone());
            }
            if fs::is_dir(dir.as_std_path().join(".git")).await
                || fs::is_file(dir.as_std_path().join(".git")).await
            {
                vcs_root = Some(dir.clone());
                break;
            }
            cursor = dir.parent();
        }

        let root = match (&monorepo_root, &vcs_root) {
            // The monorepo marker wins when it sits inside (or at) the
            // repository; a marker above the repository belongs to some
            // other project.
            (Some(marker), Some(vcs)) if vcs.contains(marker) => marker.clone(),
            (_, Some(vcs)) => vcs.clone(),
            (Some(marker), None) => marker.clone(),
            (None, None) => start.clone(),
        };

        let package_scope = resolve_scope(&start, &root).await?;
        let id = WorkspaceId::for_root(root.as_std_path());
        debug!(%root, ?package_scope, %id, "discovered workspace");

        Ok(Self {
            root,
            package_scope,
            id,
        })
    }
}

/// Report whether `dir` is a monorepo root: it carries a workspace marker
/// file, or a package manifest with a top-level `workspaces` field.
async fn is_monorepo_root(dir: &AbsDirPath) -> Result<bool> {
    for marker in MONOREPO_MARKERS {
        if fs::is_file(dir.as_std_path().join(marker)).await {
            return Ok(true);
        }
    }

    let manifest = dir.try_join_file("package.json")?;
    if let Some(content) = fs::read_buffered_utf8(&manifest).await? {
        // A malformed manifest is not a marker; discovery keeps walking.
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&content) {
            return Ok(parsed.get("workspaces").is_some());
        }
    }

    Ok(false)
}

/// Resolve the package scope: the nearest ancestor of `start` (inclusive),
/// strictly below `root`, containing a package manifest.
async fn resolve_scope(start: &AbsDirPath, root: &AbsDirPath) -> Result<Option<String>> {
    if start == root {
        return Ok(None);
    }

    let mut cursor = Some(start.clone());
    while let Some(dir) = cursor {
        if dir == *root {
            break;
        }
        if fs::is_file(dir.as_std_path().join("package.json")).await {
            // Symlinked package directories can resolve outside the root;
            // such a scope would produce paths the store cannot relativize.
            let resolved = tokio::fs::canonicalize(dir.as_std_path())
                .await
                .with_context(|| format!("canonicalize {dir:?}"))?
                .pipe(AbsDirPath::try_from)?;
            if !root.contains(&resolved) {
                warn!(?dir, ?resolved, "package scope escapes the workspace root");
                return Ok(None);
            }

            let rel = resolved.relative_to(root)?;
            return Ok(Some(rel.as_str_lossy().replace('\\', "/")));
        }
        cursor = dir.parent();
    }

    Ok(None)
}
