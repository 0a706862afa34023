//! Error types for pinstall

use std::path::PathBuf;
use std::process::ExitStatus;

/// Exit code for manifest read/write failures (sysexits `EX_IOERR`)
pub const EXIT_IO: i32 = 74;
/// Exit code for usage errors, matching clap
pub const EXIT_USAGE: i32 = 2;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Usage(String),

    #[error("Invalid package spec '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },

    #[error("Failed to run installer '{program}': {source}")]
    InstallerSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Installer '{program}' failed ({status}); manifest left untouched")]
    InstallerFailed { program: String, status: ExitStatus },

    #[error("Failed to read manifest {path:?}: {source}")]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write manifest {path:?}: {source}")]
    ManifestWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path:?}: {message}")]
    Config { path: PathBuf, message: String },
}

impl Error {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Usage(_) | Error::InvalidSpec { .. } => EXIT_USAGE,
            // Pass the installer's own code through when it has one
            Error::InstallerFailed { status, .. } => match status.code() {
                Some(code) if code != 0 => code,
                _ => 1,
            },
            Error::InstallerSpawn { .. } => 1,
            Error::ManifestRead { .. } | Error::ManifestWrite { .. } => EXIT_IO,
            Error::Config { .. } => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_errors_exit_two() {
        assert_eq!(Error::Usage("no packages".into()).exit_code(), 2);
        let err = Error::InvalidSpec {
            spec: "==1.0".into(),
            reason: "missing name".into(),
        };
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_manifest_errors_exit_ioerr() {
        let err = Error::ManifestWrite {
            path: PathBuf::from("requirements.txt"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert_eq!(err.exit_code(), EXIT_IO);
        assert!(err.to_string().contains("requirements.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_installer_exit_code_passes_through() {
        use std::os::unix::process::ExitStatusExt;

        let err = Error::InstallerFailed {
            program: "pip".into(),
            status: ExitStatus::from_raw(3 << 8),
        };
        assert_eq!(err.exit_code(), 3);

        // Killed by signal: no code
        let err = Error::InstallerFailed {
            program: "pip".into(),
            status: ExitStatus::from_raw(9),
        };
        assert_eq!(err.exit_code(), 1);
    }
}
