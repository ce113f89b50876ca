//! Package manager detection.

use derive_more::Display;
use tracing::{debug, instrument};

use crate::{fs, path::AbsDirPath};

/// The JavaScript package managers we know how to drive, in detection
/// priority order.
#[derive(Copy, Clone, Debug, Display, Eq, PartialEq, Hash)]
pub enum PackageManager {
    #[display("bun")]
    Bun,
    #[display("pnpm")]
    Pnpm,
    #[display("yarn")]
    Yarn,
    #[display("npm")]
    Npm,
}

/// Lockfiles keyed by the manager that owns them, in priority order.
const LOCKFILES: &[(PackageManager, &[&str])] = &[
    (PackageManager::Bun, &["bun.lockb", "bun.lock"]),
    (PackageManager::Pnpm, &["pnpm-lock.yaml"]),
    (PackageManager::Yarn, &["yarn.lock"]),
    (PackageManager::Npm, &["package-lock.json"]),
];

impl PackageManager {
    /// Detect the manager by the first lockfile present at the workspace
    /// root, falling back to npm.
    #[instrument(name = "PackageManager::detect")]
    pub async fn detect(root: &AbsDirPath) -> Self {
        for (manager, lockfiles) in LOCKFILES {
            for lockfile in *lockfiles {
                if fs::is_file(root.as_std_path().join(lockfile)).await {
                    debug!(%manager, lockfile, "detected package manager");
                    return *manager;
                }
            }
        }
        debug!("no lockfile found; defaulting to npm");
        PackageManager::Npm
    }

    /// The command prefix that resolves workspace-local binaries.
    pub fn runner_prefix(&self) -> &'static [&'static str] {
        match self {
            PackageManager::Bun => &["bun", "x"],
            PackageManager::Pnpm => &["pnpm", "exec"],
            PackageManager::Yarn => &["yarn", "exec"],
            PackageManager::Npm => &["npx"],
        }
    }

    /// The install command to suggest when dependencies are missing.
    pub fn install_command(&self) -> &'static str {
        match self {
            PackageManager::Bun => "bun install",
            PackageManager::Pnpm => "pnpm install",
            PackageManager::Yarn => "yarn install",
            PackageManager::Npm => "npm install",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq as pretty_assert_eq;
    use simple_test_case::test_case;

    async fn detect_with(lockfiles: &[&str]) -> PackageManager {
        let tmp = tempfile::tempdir().unwrap();
        for lockfile in lockfiles {
            std::fs::write(tmp.path().join(lockfile), "").unwrap();
        }
        PackageManager::detect(&AbsDirPath::try_from(tmp.path()).unwrap()).await
    }

    #[test_case(&[], PackageManager::Npm; "empty_defaults_to_npm")]
    #[test_case(&["package-lock.json"], PackageManager::Npm; "npm")]
    #[test_case(&["yarn.lock"], PackageManager::Yarn; "yarn")]
    #[test_case(&["pnpm-lock.yaml"], PackageManager::Pnpm; "pnpm")]
    #[test_case(&["bun.lockb"], PackageManager::Bun; "bun_binary_lockfile")]
    #[test_case(&["bun.lock"], PackageManager::Bun; "bun_text_lockfile")]
    #[test_case(&["package-lock.json", "yarn.lock"], PackageManager::Yarn; "yarn_beats_npm")]
    #[test_case(&["yarn.lock", "pnpm-lock.yaml"], PackageManager::Pnpm; "pnpm_beats_yarn")]
    #[test_case(
        &["package-lock.json", "yarn.lock", "pnpm-lock.yaml", "bun.lockb"],
        PackageManager::Bun;
        "bun_beats_everything"
    )]
    #[test_log::test(tokio::test)]
    async fn detection_priority(lockfiles: &[&str], expected: PackageManager) {
        pretty_assert_eq!(detect_with(lockfiles).await, expected);
    }

    #[test]
    fn runner_prefixes() {
        pretty_assert_eq!(PackageManager::Bun.runner_prefix(), &["bun", "x"]);
        pretty_assert_eq!(PackageManager::Pnpm.runner_prefix(), &["pnpm", "exec"]);
        pretty_assert_eq!(PackageManager::Yarn.runner_prefix(), &["yarn", "exec"]);
        pretty_assert_eq!(PackageManager::Npm.runner_prefix(), &["npx"]);
    }

    #[test]
    fn install_commands_name_the_manager() {
        for manager in [
            PackageManager::Bun,
            PackageManager::Pnpm,
            PackageManager::Yarn,
            PackageManager::Npm,
        ] {
            assert!(manager.install_command().contains(&manager.to_string()));
        }
    }
}
