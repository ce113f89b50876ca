//! Workspace-root-relative path normalization of tool reports.
//!
//! Absolute paths inside the reports would leak machine layout into the
//! store and break stable ids across clones, so they are rewritten at the
//! producer boundary, before ingestion. Rewrites are atomic: a sibling
//! `.tmp` file is written and renamed into place.

use color_eyre::{Result, eyre::Context};
use serde_json::Value;
use tracing::instrument;

use crate::{
    fs,
    path::{AbsDirPath, AbsFilePath},
};

/// Strip the workspace-root prefix from a single path, leaving paths outside
/// the root untouched.
pub fn relativize(path: &str, root: &str) -> String {
    let root = root.trim_end_matches('/');
    match path.strip_prefix(root) {
        Some(rest) if rest.starts_with('/') => rest.trim_start_matches('/').to_string(),
        Some(rest) if rest.is_empty() => String::new(),
        _ => path.to_string(),
    }
}

/// Rewrite `testResults[].name` in a vitest report to root-relative paths.
///
/// Returns the report's failed-test count, which the summary reports as the
/// absolute failure total.
#[instrument]
pub async fn vitest_report(path: &AbsFilePath, root: &AbsDirPath) -> Result<u64> {
    let content = fs::must_read_buffered_utf8(path).await?;
    let mut report =
        serde_json::from_str::<Value>(&content).context("parse vitest report for rewrite")?;

    let root = root.as_str_lossy().into_owned();
    if let Some(results) = report
        .get_mut("testResults")
        .and_then(Value::as_array_mut)
    {
        for result in results {
            if let Some(name) = result.get("name").and_then(Value::as_str) {
                let rewritten = relativize(name, &root);
                result["name"] = Value::String(rewritten);
            }
        }
    }

    let failed = report
        .get("numFailedTests")
        .and_then(Value::as_u64)
        .unwrap_or(0);

    let serialized = serde_json::to_vec(&report).context("serialize rewritten report")?;
    fs::write_atomic(path, serialized).await?;
    Ok(failed)
}

/// Rewrite `filePath` in each element of an eslint report to root-relative
/// paths.
#[instrument]
pub async fn eslint_report(path: &AbsFilePath, root: &AbsDirPath) -> Result<()> {
    let content = fs::must_read_buffered_utf8(path).await?;
    let mut report =
        serde_json::from_str::<Value>(&content).context("parse eslint report for rewrite")?;

    let root = root.as_str_lossy().into_owned();
    if let Some(entries) = report.as_array_mut() {
        for entry in entries {
            if let Some(file_path) = entry.get("filePath").and_then(Value::as_str) {
                let rewritten = relativize(file_path, &root);
                entry["filePath"] = Value::String(rewritten);
            }
        }
    }

    let serialized = serde_json::to_vec(&report).context("serialize rewritten report")?;
    fs::write_atomic(path, serialized).await?;
    Ok(())
}
