//! Affected-test selection.
//!
//! Dirty files are derived on demand from VCS state (`git status
//! --porcelain`) under the workspace root. The dirty→test mapping is
//! deliberately simple for now: dirty test files select themselves, and any
//! other dirty file selects every test file in its package. The RPC contract
//! allows this mapping to be refined without changing callers.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    process::Stdio,
};

use color_eyre::{Result, eyre::Context};
use tokio::task::spawn_blocking;
use tracing::{debug, instrument, warn};

/// The outcome of affected-test selection for one check.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Selection {
    pub dirty_files: Vec<String>,
    pub test_files: Vec<String>,
    pub is_full_run: bool,
    pub total_test_files: u64,
}

/// Select the tests worth running under `root`.
///
/// `force_full` short-circuits to a full run with an empty file list. A
/// workspace without usable VCS state also falls back to a full run, since
/// nothing can be said about what changed.
#[instrument]
pub async fn select(root: &Path, force_full: bool) -> Result<Selection> {
    if force_full {
        return Ok(Selection {
            is_full_run: true,
            ..Default::default()
        });
    }

    let dirty = match dirty_files(root).await {
        Ok(dirty) => dirty,
        Err(err) => {
            warn!(?err, "unable to read VCS state; forcing a full run");
            return Ok(Selection {
                is_full_run: true,
                ..Default::default()
            });
        }
    };

    let census = test_census(root).await?;
    let total_test_files = census.len() as u64;

    if dirty.is_empty() {
        return Ok(Selection {
            total_test_files,
            ..Default::default()
        });
    }

    let test_files = map_dirty_to_tests(root, &dirty, &census).await;
    debug!(
        dirty = dirty.len(),
        affected = test_files.len(),
        total = total_test_files,
        "selected affected tests"
    );

    Ok(Selection {
        dirty_files: dirty,
        test_files,
        is_full_run: false,
        total_test_files,
    })
}

/// Files reported changed by git, as forward-slash workspace-relative paths.
#[instrument]
pub async fn dirty_files(root: &Path) -> Result<Vec<String>> {
    let output = tokio::process::Command::new("git")
        .arg("-C")
        .arg(root)
        .args(["status", "--porcelain"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("spawn git status")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        color_eyre::eyre::bail!("git status exited with {}: {}", output.status, stderr.trim());
    }

    let stdout = String::from_utf8(output.stdout).context("decode git status output")?;
    Ok(parse_porcelain(&stdout))
}

/// Parse `git status --porcelain` output into paths.
///
/// Renames (`R  old -> new`) report the new path. Quoted paths are left
/// quoted; they only arise for unusual file names and the mapping treats
/// them as opaque strings.
pub fn parse_porcelain(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.len() > 3)
        .map(|line| {
            let path = &line[3..];
            match path.split_once(" -> ") {
                Some((_, renamed)) => renamed.to_string(),
                None => path.to_string(),
            }
        })
        .collect()
}

/// Report whether a workspace-relative path names a test file.
pub fn is_test_file(path: &str) -> bool {
    let Some(name) = path.rsplit('/').next() else {
        return false;
    };
    let has_marker = name.contains(".test.") || name.contains(".spec.");
    let has_ext = [".ts", ".tsx", ".js", ".jsx", ".mjs", ".cjs"]
        .iter()
        .any(|ext| name.ends_with(ext));
    has_marker && has_ext
}

/// All test files under `root`, as sorted forward-slash relative paths.
///
/// `node_modules` and VCS metadata are never descended into.
async fn test_census(root: &Path) -> Result<BTreeSet<String>> {
    let root = root.to_path_buf();
    spawn_blocking(move || {
        let mut census = BTreeSet::new();
        let walker = walkdir::WalkDir::new(&root).into_iter();
        for entry in walker.filter_entry(|e| !is_ignored_dir(e)) {
            let entry = entry.context("walk workspace")?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&root) else {
                continue;
            };
            let rel = rel.to_string_lossy().replace('\\', "/");
            if is_test_file(&rel) {
                census.insert(rel);
            }
        }
        Ok(census)
    })
    .await
    .context("join census task")?
}

fn is_ignored_dir(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir()
        && matches!(
            entry.file_name().to_str(),
            Some("node_modules") | Some(".git")
        )
}

/// Map dirty files to the test files worth running.
async fn map_dirty_to_tests(
    root: &Path,
    dirty: &[String],
    census: &BTreeSet<String>,
) -> Vec<String> {
    let mut selected = BTreeSet::new();

    // Dirty test files select themselves, as long as they still exist.
    for path in dirty {
        if census.contains(path) {
            selected.insert(path.clone());
        }
    }

    // Any other dirty file selects every test file in its package.
    let mut package_prefixes = BTreeSet::new();
    for path in dirty.iter().filter(|path| !is_test_file(path)) {
        if let Some(package) = package_dir(root, path).await {
            package_prefixes.insert(package);
        }
    }
    for prefix in &package_prefixes {
        for test in census {
            let in_package = prefix.is_empty()
                || test.starts_with(&format!("{prefix}/"))
                || test == prefix;
            if in_package {
                selected.insert(test.clone());
            }
        }
    }

    selected.into_iter().collect()
}

/// The package directory of a workspace-relative path: the nearest ancestor
/// directory containing a package manifest, as a relative path. The empty
/// string denotes the workspace root itself.
async fn package_dir(root: &Path, path: &str) -> Option<String> {
    let mut dir = PathBuf::from(path);
    dir.pop();

    loop {
        let manifest = root.join(&dir).join("package.json");
        if tokio::fs::try_exists(&manifest).await.unwrap_or(false) {
            return Some(dir.to_string_lossy().replace('\\', "/"));
        }
        if !dir.pop() {
            break;
        }
    }

    // The workspace root counts when it carries a manifest.
    let manifest = root.join("package.json");
    if tokio::fs::try_exists(&manifest).await.unwrap_or(false) {
        return Some(String::new());
    }
    None
}
