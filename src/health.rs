//! Preflight checks run by `orgmirror doctor`

use std::path::Path;

use crate::Config;

/// Result of system health checks
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Git executable status
    pub git: CheckResult,
    /// Destination directory status
    pub destination: CheckResult,
    /// SSH key status (warning only, needed for token runs)
    pub ssh: CheckResult,
}

/// Result of an individual health check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
    pub is_warning: bool,
}

impl CheckResult {
    fn ok_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn warning_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: true,
        }
    }
}

impl HealthCheck {
    /// Run all health checks
    pub fn run(config: &Config) -> Self {
        Self {
            git: Self::check_git(&config.sync.git_binary),
            destination: Self::check_destination(config.destination.as_deref()),
            ssh: Self::check_ssh(),
        }
    }

    /// Check if all required checks passed (excludes warnings)
    pub fn all_passed(&self) -> bool {
        self.git.passed && self.destination.passed
    }

    /// Failed checks (errors only, not warnings)
    pub fn errors(&self) -> Vec<&CheckResult> {
        [&self.git, &self.destination, &self.ssh]
            .into_iter()
            .filter(|r| !r.passed && !r.is_warning)
            .collect()
    }

    pub fn warnings(&self) -> Vec<&CheckResult> {
        [&self.git, &self.destination, &self.ssh]
            .into_iter()
            .filter(|r| r.is_warning)
            .collect()
    }

    fn check_git(binary: &str) -> CheckResult {
        match std::process::Command::new(binary).arg("--version").output() {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                CheckResult::ok_with_details("Git installed", version.trim().to_string())
            }
            Ok(_) => CheckResult::error(format!("`{} --version` failed", binary)),
            Err(_) => CheckResult::error_with_details(
                format!("{} not found", binary),
                "Install git: https://git-scm.com/downloads",
            ),
        }
    }

    /// The destination is created on demand, so a missing directory is fine
    /// as long as the nearest existing ancestor is a directory.
    fn check_destination(destination: Option<&str>) -> CheckResult {
        let Some(destination) = destination else {
            return CheckResult::error_with_details(
                "No destination configured",
                "Pass --dir or set `destination` in the config file",
            );
        };

        let expanded = match shellexpand::full(destination) {
            Ok(expanded) => expanded.into_owned(),
            Err(e) => {
                return CheckResult::error_with_details("Invalid destination path", e.to_string())
            }
        };

        let path = Path::new(&expanded);
        if path.is_dir() {
            return CheckResult::ok_with_details("Destination directory exists", expanded);
        }
        if path.exists() {
            return CheckResult::error_with_details("Destination is not a directory", expanded);
        }

        match path.ancestors().skip(1).find(|p| p.exists()) {
            Some(ancestor) if ancestor.is_dir() => CheckResult::ok_with_details(
                "Destination directory will be created",
                expanded.clone(),
            ),
            Some(ancestor) => CheckResult::error_with_details(
                "Destination cannot be created",
                format!("{} is not a directory", ancestor.display()),
            ),
            None => CheckResult::error_with_details("Destination cannot be created", expanded),
        }
    }

    /// Token runs clone over SSH; basic-auth runs don't need keys at all
    fn check_ssh() -> CheckResult {
        let ssh_dir = dirs::home_dir().unwrap_or_default().join(".ssh");
        if !ssh_dir.exists() {
            return CheckResult::warning_with_details(
                "~/.ssh directory not found",
                "Token runs clone over SSH. Run: ssh-keygen -t ed25519",
            );
        }

        let found_keys: Vec<_> = ["id_rsa", "id_ed25519", "id_ecdsa"]
            .into_iter()
            .filter(|key| ssh_dir.join(key).exists())
            .collect();

        if found_keys.is_empty() {
            CheckResult::warning_with_details(
                "No SSH keys found",
                "Token runs clone over SSH; an agent or ssh config may still provide a key",
            )
        } else {
            CheckResult::ok_with_details("SSH keys found", found_keys.join(", "))
        }
    }

    /// All checks with their display names
    pub fn all_checks(&self) -> [(&'static str, &CheckResult); 3] {
        [
            ("Git", &self.git),
            ("Destination", &self.destination),
            ("SSH Keys", &self.ssh),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_git_binary_fails() {
        let result = HealthCheck::check_git("/nonexistent/bin/git-orgmirror");
        assert!(!result.passed);
        assert!(!result.is_warning);
        assert!(result.details.is_some());
    }

    #[test]
    fn test_existing_destination() {
        let dir = TempDir::new().unwrap();
        let result = HealthCheck::check_destination(dir.path().to_str());
        assert!(result.passed);
        assert_eq!(result.message, "Destination directory exists");
    }

    #[test]
    fn test_creatable_destination() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let result = HealthCheck::check_destination(nested.to_str());
        assert!(result.passed);
        assert_eq!(result.message, "Destination directory will be created");
    }

    #[test]
    fn test_destination_under_a_file_fails() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, "x").unwrap();

        assert!(!HealthCheck::check_destination(file.to_str()).passed);
        assert!(!HealthCheck::check_destination(file.join("below").to_str()).passed);
    }

    #[test]
    fn test_unset_destination_fails() {
        let result = HealthCheck::check_destination(None);
        assert!(!result.passed);
    }

    #[test]
    fn test_check_ssh_never_errors() {
        let result = HealthCheck::check_ssh();
        assert!(result.passed);
    }

    #[test]
    fn test_ssh_warning_does_not_fail() {
        let health = HealthCheck {
            git: CheckResult::ok_with_details("Git OK", "git version 2.43.0"),
            destination: CheckResult::ok_with_details("Dir OK", "/backups"),
            ssh: CheckResult::warning_with_details("No SSH keys", "hint"),
        };
        assert!(health.all_passed());
        assert!(health.errors().is_empty());
        assert_eq!(health.warnings().len(), 1);
    }

    #[test]
    fn test_errors_returns_only_errors() {
        let health = HealthCheck {
            git: CheckResult::error("Git missing"),
            destination: CheckResult::error("Dir missing"),
            ssh: CheckResult::warning_with_details("No SSH keys", "hint"),
        };
        assert!(!health.all_passed());
        assert_eq!(health.errors().len(), 2);
        assert_eq!(health.all_checks()[1].0, "Destination");
    }
}
