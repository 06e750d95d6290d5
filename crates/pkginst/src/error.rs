use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::resolver::ToolOutput;

/// The closed set of ways an installation can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidMimeType,
    ArchiveNotOpenable,
    ManifestMissing,
    MalformedManifest,
    TargetCollision,
    ExtractionFailure,
    ManifestPatchFailure,
    ExternalToolFailure,
}

impl ErrorKind {
    /// Stable message key, suitable for a translation catalogue.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidMimeType => "error.zip_mime_type",
            ErrorKind::ArchiveNotOpenable => "error.zip_not_openable",
            ErrorKind::ManifestMissing => "error.composer_json_not_exists",
            ErrorKind::MalformedManifest => "error.composer_json_malformed",
            ErrorKind::TargetCollision => "error.package_directory_exists",
            ErrorKind::ExtractionFailure => "error.extraction_failed",
            ErrorKind::ManifestPatchFailure => "error.composer_json_update_failed",
            ErrorKind::ExternalToolFailure => "error.composer_update_failed",
        }
    }

    /// English message template; `:name` placeholders are filled from the error params.
    pub fn template(&self) -> &'static str {
        match self {
            ErrorKind::InvalidMimeType => "The file is not a valid zip archive.",
            ErrorKind::ArchiveNotOpenable => "Impossible to open zip archive.",
            ErrorKind::ManifestMissing => "There is no composer.json file in the zip archive.",
            ErrorKind::MalformedManifest => {
                "The composer.json file in the zip archive is invalid: :reason"
            }
            ErrorKind::TargetCollision => "The directory \":path\" already exists.",
            ErrorKind::ExtractionFailure => "Unable to extract the package: :reason",
            ErrorKind::ManifestPatchFailure => {
                "Unable to update the application's composer.json: :reason"
            }
            ErrorKind::ExternalToolFailure => "Composer failed to install the package: :reason",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Message shown after a successful installation.
pub const SUCCESS_MESSAGE: &str = "The package was correctly installed!";

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Unexpected media type '{actual}' (expected '{expected}')")]
    InvalidMimeType { expected: String, actual: String },

    #[error("Cannot open archive {path}: {reason}")]
    ArchiveNotOpenable { path: PathBuf, reason: String },

    #[error("No {file} found in archive")]
    ManifestMissing { file: String },

    #[error("Invalid package manifest: {reason}")]
    MalformedManifest { reason: String },

    #[error("Package directory {path} already exists")]
    TargetCollision { path: PathBuf },

    #[error("Extraction failed: {reason}")]
    ExtractionFailure {
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Failed to update {path}: {reason}")]
    ManifestPatchFailure { path: PathBuf, reason: String },

    #[error("{program} failed: {reason}")]
    ExternalToolFailure {
        program: String,
        reason: String,
        output: Option<ToolOutput>,
    },
}

impl InstallError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InstallError::InvalidMimeType { .. } => ErrorKind::InvalidMimeType,
            InstallError::ArchiveNotOpenable { .. } => ErrorKind::ArchiveNotOpenable,
            InstallError::ManifestMissing { .. } => ErrorKind::ManifestMissing,
            InstallError::MalformedManifest { .. } => ErrorKind::MalformedManifest,
            InstallError::TargetCollision { .. } => ErrorKind::TargetCollision,
            InstallError::ExtractionFailure { .. } => ErrorKind::ExtractionFailure,
            InstallError::ManifestPatchFailure { .. } => ErrorKind::ManifestPatchFailure,
            InstallError::ExternalToolFailure { .. } => ErrorKind::ExternalToolFailure,
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// Formatting parameters for the user-facing message.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        match self {
            InstallError::TargetCollision { path } => {
                vec![("path", path.display().to_string())]
            }
            InstallError::MalformedManifest { reason }
            | InstallError::ExtractionFailure { reason, .. }
            | InstallError::ManifestPatchFailure { reason, .. }
            | InstallError::ExternalToolFailure { reason, .. } => {
                vec![("reason", reason.clone())]
            }
            _ => Vec::new(),
        }
    }

    /// User-facing English message with parameters substituted.
    pub fn message(&self) -> String {
        let mut message = self.kind().template().to_string();
        for (key, value) in self.params() {
            message = message.replace(&format!(":{}", key), &value);
        }
        message
    }

    /// Captured output of the external tool, if it got that far.
    pub fn tool_output(&self) -> Option<&ToolOutput> {
        match self {
            InstallError::ExternalToolFailure { output, .. } => output.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn extraction(reason: impl Into<String>) -> Self {
        InstallError::ExtractionFailure {
            reason: reason.into(),
            source: None,
        }
    }

    pub(crate) fn extraction_io(context: impl fmt::Display, err: std::io::Error) -> Self {
        InstallError::ExtractionFailure {
            reason: format!("{}: {}", context, err),
            source: Some(err),
        }
    }

    pub(crate) fn patch(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        InstallError::ManifestPatchFailure {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, InstallError>;
