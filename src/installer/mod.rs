//! External package installer invocation
//!
//! The installer is an opaque subprocess (`python3 -m pip install` by
//! default). Its stdout and stderr are inherited so the user sees pip's own
//! progress and errors.

use once_cell::sync::Lazy;
use regex::Regex;
use std::process::{Command, Stdio};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::PackageSpec;

static VERSION_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^Version:[ \t]*(\S+)[ \t]*\r?$").unwrap());

/// Runs the configured install and show commands
#[derive(Debug, Clone)]
pub struct Installer {
    install_command: Vec<String>,
    show_command: Vec<String>,
}

impl Installer {
    pub fn new(install_command: Vec<String>, show_command: Vec<String>) -> Self {
        Self {
            install_command,
            show_command,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.install_command.clone(), config.show_command.clone())
    }

    /// Install all specs with a single installer run
    pub fn install(&self, specs: &[PackageSpec]) -> Result<()> {
        if specs.is_empty() {
            return Err(Error::Usage("No package specs given".to_string()));
        }

        let (program, args) = split_command(&self.install_command, "install")?;
        let targets: Vec<String> = specs.iter().map(ToString::to_string).collect();
        info!("running {} {} {}", program, args.join(" "), targets.join(" "));

        let status = Command::new(program)
            .args(args)
            .args(&targets)
            .status()
            .map_err(|source| Error::InstallerSpawn {
                program: program.clone(),
                source,
            })?;

        if !status.success() {
            return Err(Error::InstallerFailed {
                program: program.clone(),
                status,
            });
        }
        Ok(())
    }

    /// Look up the installed version of a package
    ///
    /// Returns `None` when the show command fails or prints no version,
    /// which is how pip reports a package that is not installed.
    pub fn installed_version(&self, name: &str) -> Result<Option<String>> {
        let (program, args) = split_command(&self.show_command, "show")?;

        let output = Command::new(program)
            .args(args)
            .arg(name)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| Error::InstallerSpawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            debug!(
                "{} show {} exited with {}: {}",
                program,
                name,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(None);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_version_field(&stdout))
    }
}

fn split_command<'a>(command: &'a [String], what: &str) -> Result<(&'a String, &'a [String])> {
    command
        .split_first()
        .ok_or_else(|| Error::Usage(format!("The {} command is empty", what)))
}

/// Extract `Version: x.y.z` from `pip show` output
fn parse_version_field(output: &str) -> Option<String> {
    VERSION_FIELD
        .captures(output)
        .map(|caps| caps[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn specs(list: &[&str]) -> Vec<PackageSpec> {
        list.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn test_parse_version_field() {
        let out = "Name: requests\nVersion: 2.31.0\nSummary: HTTP\n";
        assert_eq!(parse_version_field(out).as_deref(), Some("2.31.0"));
        assert_eq!(parse_version_field("Name: x\r\nVersion: 1.0\r\n").as_deref(), Some("1.0"));
        assert!(parse_version_field("WARNING: Package(s) not found: nope\n").is_none());
    }

    #[test]
    fn test_install_requires_specs() {
        let installer = Installer::new(cmd(&["true"]), cmd(&["true"]));
        let err = installer.install(&[]).unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
    }

    #[test]
    fn test_empty_command_is_rejected() {
        let installer = Installer::new(vec![], vec![]);
        assert!(installer.install(&specs(&["requests"])).is_err());
        assert!(installer.installed_version("requests").is_err());
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let installer = Installer::new(cmd(&["pinstall-no-such-program"]), vec![]);
        let err = installer.install(&specs(&["requests"])).unwrap_err();
        assert!(matches!(err, Error::InstallerSpawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_install_success_and_failure() {
        let ok = Installer::new(cmd(&["true"]), vec![]);
        assert!(ok.install(&specs(&["requests"])).is_ok());

        let failing = Installer::new(cmd(&["false"]), vec![]);
        let err = failing.install(&specs(&["requests"])).unwrap_err();
        assert!(matches!(err, Error::InstallerFailed { .. }));
        assert_eq!(err.exit_code(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_install_passes_all_specs_in_one_call() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join("args.log");
        let script = format!("printf '%s\\n' \"$@\" >> '{}'", log.display());
        let installer = Installer::new(cmd(&["sh", "-c", &script, "sh"]), vec![]);

        installer
            .install(&specs(&["requests", "flask >= 2.0", "numpy[dev]==1.26.0"]))
            .unwrap();

        let logged = std::fs::read_to_string(&log).unwrap();
        assert_eq!(logged, "requests\nflask>=2.0\nnumpy[dev]==1.26.0\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_installed_version_from_show_command() {
        let show = cmd(&[
            "sh",
            "-c",
            "printf 'Name: %s\\nVersion: 2.31.0\\n' \"$1\"",
            "sh",
        ]);
        let installer = Installer::new(vec![], show);
        assert_eq!(
            installer.installed_version("requests").unwrap().as_deref(),
            Some("2.31.0")
        );

        let missing = Installer::new(vec![], cmd(&["false"]));
        assert_eq!(missing.installed_version("requests").unwrap(), None);
    }
}
