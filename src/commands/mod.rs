//! CLI commands for pinstall

use anyhow::Context;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::installer::Installer;
use crate::manifest::{Change, Manifest, Outcome};
use crate::models::PackageSpec;

/// Output format for the run report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Summary,
    Json,
}

/// Options for one install run
#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub specs: Vec<PackageSpec>,
    pub manifest: PathBuf,
    /// Record installed versions for unversioned specs
    pub pin: bool,
    /// Report what would change without installing or writing
    pub dry_run: bool,
}

/// Result of a run, printed for the user
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub manifest: PathBuf,
    pub dry_run: bool,
    /// Whether the manifest file was written
    pub written: bool,
    pub changes: Vec<Change>,
}

/// Parse package spec arguments
pub fn parse_specs<S: AsRef<str>>(args: &[S]) -> Result<Vec<PackageSpec>> {
    if args.is_empty() {
        return Err(Error::Usage(
            "No package specs given. Usage: pinstall <package> [<package> ...]".to_string(),
        ));
    }
    args.iter().map(|arg| arg.as_ref().parse()).collect()
}

/// Install packages and reconcile the manifest
///
/// The manifest is only written after the installer succeeded and the full
/// new content is computed.
pub fn install(options: &InstallOptions, installer: &Installer) -> Result<RunReport> {
    if options.specs.is_empty() {
        return Err(Error::Usage("No package specs given".to_string()));
    }

    // Fail on an unreadable manifest before touching the environment
    let mut manifest = Manifest::load(&options.manifest)?;

    if options.dry_run {
        info!("dry run: skipping installer");
    } else {
        installer.install(&options.specs)?;
    }

    let recorded = if options.pin && options.dry_run {
        // Nothing was installed, so there is no version to look up
        info!("dry run: recording specs unpinned");
        options.specs.clone()
    } else if options.pin {
        pin_versions(&options.specs, installer)
    } else {
        options.specs.clone()
    };

    let changes = manifest.reconcile(&recorded);

    let written = if options.dry_run {
        false
    } else if manifest.is_modified() || !manifest.exists() {
        manifest.save(&options.manifest)?;
        true
    } else {
        false
    };

    Ok(RunReport {
        manifest: options.manifest.clone(),
        dry_run: options.dry_run,
        written,
        changes,
    })
}

/// Replace unversioned specs with `==<installed version>` where one is known
fn pin_versions(specs: &[PackageSpec], installer: &Installer) -> Vec<PackageSpec> {
    specs
        .iter()
        .map(|spec| {
            if spec.is_versioned() {
                return spec.clone();
            }
            match installer.installed_version(&spec.name) {
                Ok(Some(version)) => spec.pinned(&version),
                Ok(None) => {
                    warn!("no installed version found for {}, recording it unpinned", spec.name);
                    spec.clone()
                }
                Err(e) => {
                    warn!("version lookup for {} failed: {}", spec.name, e);
                    spec.clone()
                }
            }
        })
        .collect()
}

/// Print a run report
pub fn print_report(report: &RunReport, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            let json =
                serde_json::to_string_pretty(report).context("Failed to serialize report")?;
            println!("{}", json);
        }
        OutputFormat::Summary => {
            let file = report.manifest.display();
            let prefix = if report.dry_run { "(dry run) " } else { "" };
            for change in &report.changes {
                match &change.outcome {
                    Outcome::Added => {
                        println!("{}✓ Added {} to {}", prefix, change.requirement, file)
                    }
                    Outcome::Updated { previous } => println!(
                        "{}✓ Updated {} -> {} in {}",
                        prefix, previous, change.requirement, file
                    ),
                    Outcome::Unchanged => {
                        println!("{}ℹ {} already listed in {}", prefix, change.requirement, file)
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_specs_requires_input() {
        let none: [&str; 0] = [];
        assert!(matches!(parse_specs(&none), Err(Error::Usage(_))));
    }

    #[test]
    fn test_parse_specs_rejects_empty_name() {
        let err = parse_specs(&["requests", ""]).unwrap_err();
        assert!(matches!(err, Error::InvalidSpec { .. }));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_parse_specs_keeps_order() {
        let specs = parse_specs(&["b", "a==1.0"]).unwrap();
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["b", "a"]);
    }

    #[test]
    fn test_report_json_shape() {
        let report = RunReport {
            manifest: PathBuf::from("requirements.txt"),
            dry_run: false,
            written: true,
            changes: vec![Change {
                package: "flask".to_string(),
                requirement: "flask==2.1.0".to_string(),
                outcome: Outcome::Updated {
                    previous: "flask==2.0.0".to_string(),
                },
            }],
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["changes"][0]["action"], "updated");
        assert_eq!(value["changes"][0]["previous"], "flask==2.0.0");
        assert_eq!(value["written"], true);
    }
}
