//! Environment validation for the deploy service.
//!
//! Pre-flight checks confirm the external programs the pipeline drives are
//! actually present before any blueprint is accepted.

use std::process::Command;

use tracing::{info, warn};

use crate::error::{DeployError, DeployResult};

/// One probed tool.
#[derive(Debug, Clone)]
pub struct ToolProbe {
    /// Binary name.
    pub name: &'static str,
    /// Whether the tool responded to `--version`.
    pub available: bool,
    /// First line of the version output, when available.
    pub version: Option<String>,
    /// Whether the pipeline can run at all without this tool.
    pub critical: bool,
}

/// Results of probing the deployment environment.
#[derive(Debug, Clone)]
pub struct EnvironmentCheck {
    /// All probed tools.
    pub probes: Vec<ToolProbe>,
}

/// Tools the pipeline shells out to, with the arguments used to probe
/// them. Version managers are optional: blueprints that need one fail
/// individually at runtime-setup time. `sh` gets a no-op script because
/// dash rejects `--version`.
const TOOLS: &[(&str, &[&str], bool)] = &[
    ("sh", &["-c", "exit 0"], true),
    ("git", &["--version"], true),
    ("caddy", &["--version"], true),
    ("nodenv", &["--version"], false),
    ("pyenv", &["--version"], false),
    ("goenv", &["--version"], false),
    ("phpenv", &["--version"], false),
    ("asdf", &["--version"], false),
];

impl EnvironmentCheck {
    /// Probe every tool and log the outcome.
    #[must_use]
    pub fn run() -> Self {
        info!("probing deployment environment");

        let probes = TOOLS
            .iter()
            .map(|&(name, args, critical)| {
                let (available, version) = probe(name, args);
                ToolProbe {
                    name,
                    available,
                    version,
                    critical,
                }
            })
            .collect();

        let check = Self { probes };
        check.log_status();
        check
    }

    /// Whether all critical tools are available.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.probes
            .iter()
            .all(|probe| probe.available || !probe.critical)
    }

    /// Validate the environment, listing every missing critical tool.
    pub fn validate(&self) -> DeployResult<()> {
        let missing: Vec<String> = self
            .probes
            .iter()
            .filter(|probe| probe.critical && !probe.available)
            .map(|probe| probe.name.to_owned())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(DeployError::MissingTools { tools: missing })
        }
    }

    fn log_status(&self) {
        for probe in &self.probes {
            if probe.available {
                info!(
                    tool = probe.name,
                    version = probe.version.as_deref().unwrap_or("unknown"),
                    "available"
                );
            } else if probe.critical {
                warn!(tool = probe.name, "NOT AVAILABLE - deployments will fail");
            } else {
                info!(
                    tool = probe.name,
                    "not available - blueprints needing it will fail"
                );
            }
        }
    }
}

fn probe(name: &str, args: &[&str]) -> (bool, Option<String>) {
    match Command::new(name).args(args).output() {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(|s| s.trim().to_owned());
            (true, version)
        }
        Ok(_) | Err(_) => (false, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_fixture(name: &'static str, available: bool, critical: bool) -> ToolProbe {
        ToolProbe {
            name,
            available,
            version: None,
            critical,
        }
    }

    #[test]
    fn ready_when_critical_tools_present() {
        let check = EnvironmentCheck {
            probes: vec![
                probe_fixture("sh", true, true),
                probe_fixture("git", true, true),
                probe_fixture("caddy", true, true),
                probe_fixture("nodenv", false, false),
            ],
        };
        assert!(check.is_ready());
        assert!(check.validate().is_ok());
    }

    #[test]
    fn missing_critical_tool_fails_validation() {
        let check = EnvironmentCheck {
            probes: vec![
                probe_fixture("sh", true, true),
                probe_fixture("git", false, true),
                probe_fixture("caddy", false, true),
            ],
        };
        assert!(!check.is_ready());

        let err = check.validate().unwrap_err();
        match err {
            DeployError::MissingTools { tools } => {
                assert_eq!(tools, vec!["git".to_owned(), "caddy".to_owned()]);
            }
            other => panic!("expected missing tools, got {other:?}"),
        }
    }

    #[test]
    fn probe_reports_missing_tools() {
        let (available, version) = probe("definitely-not-a-real-tool-7d3f", &["--version"]);
        assert!(!available);
        assert!(version.is_none());
    }

    #[test]
    fn probe_finds_the_shell() {
        let (available, _) = probe("sh", &["-c", "exit 0"]);
        assert!(available);
    }
}
