//! Installs Composer packages from uploaded zip archives.
//!
//! The archive's `composer.json` names the package; its tree is extracted to
//! `<packages-dir>/<vendor>/<name>`, the host application's `composer.json`
//! gains a requirement and a path repository, and `composer update <name>`
//! finishes the job. See [`InstallPipeline`].

pub mod archive;
pub mod config;
pub mod error;
pub mod extractor;
pub mod host_manifest;
pub mod manifest;
pub mod pipeline;
pub mod planner;
pub mod resolver;
pub mod upload;

pub use archive::{ArchiveReader, EntryRef};
pub use config::InstallConfig;
pub use error::{ErrorKind, InstallError, Result, SUCCESS_MESSAGE};
pub use extractor::{ExtractionReport, Extractor};
pub use host_manifest::{HostManifestPatcher, PatchRequest, PatchSummary, RepositoryPolicy};
pub use manifest::{ManifestDocument, PackageIdentity};
pub use pipeline::{InstallFailure, InstallOutcome, InstallPipeline, PipelineState};
pub use planner::{InstallationPlanner, InstallationTarget};
pub use resolver::{ComposerResolver, DependencyResolver, ToolOutput};
pub use upload::UploadedArchive;
