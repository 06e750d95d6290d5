//! The installation pipeline.
//!
//! An uploaded archive goes through a fixed sequence of stages:
//!
//! ```text
//! Received -> MimeValidated -> Opened -> ManifestFound -> TargetResolved
//!          -> CollisionChecked -> Extracted -> ManifestPatched
//!          -> ExternalInvoked -> Succeeded
//! ```
//!
//! The first failing stage ends the run with `Failed(kind)`. Every mutation
//! records a compensation; failures after a mutation undo them in reverse
//! order (see [`InstallConfig::rollback_on_tool_failure`] for the resolver stage).

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::archive::ArchiveReader;
use crate::config::InstallConfig;
use crate::error::{ErrorKind, InstallError, Result};
use crate::extractor::Extractor;
use crate::host_manifest::{HostManifestPatcher, PatchRequest, PatchSummary};
use crate::manifest::{self, PackageIdentity, MANIFEST_FILE};
use crate::planner::{InstallationPlanner, InstallationTarget};
use crate::resolver::{ComposerResolver, DependencyResolver, ToolOutput};
use crate::upload::{media_type_matches, UploadedArchive};

/// Pipeline progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Received,
    MimeValidated,
    Opened,
    ManifestFound,
    TargetResolved,
    CollisionChecked,
    Extracted,
    ManifestPatched,
    ExternalInvoked,
    Succeeded,
    Failed(ErrorKind),
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Succeeded | PipelineState::Failed(_))
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Failed(kind) => write!(f, "Failed({})", kind.code()),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub identity: PackageIdentity,
    pub target: InstallationTarget,
    pub requirement_added: bool,
    pub repository_added: bool,
    /// Resolver output; `None` on dry runs or when the update is skipped
    pub tool_output: Option<ToolOutput>,
    /// States visited, in order
    pub states: Vec<PipelineState>,
    pub dry_run: bool,
}

/// A failed run: the error plus how far the pipeline got.
#[derive(Debug)]
pub struct InstallFailure {
    pub error: InstallError,
    /// States visited, ending with `Failed(kind)`
    pub states: Vec<PipelineState>,
    /// Compensations that were executed, most recent first
    pub rolled_back: Vec<String>,
}

impl fmt::Display for InstallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for InstallFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<InstallFailure> for InstallError {
    fn from(failure: InstallFailure) -> Self {
        failure.error
    }
}

/// Undo action for a mutation already performed.
#[derive(Debug)]
enum Compensation {
    RemovePackageDir(PathBuf),
    RemoveVendorDirIfEmpty(PathBuf),
    RestoreHostManifest(PatchSummary),
}

impl Compensation {
    fn run(&self) -> std::io::Result<()> {
        match self {
            Compensation::RemovePackageDir(dir) => std::fs::remove_dir_all(dir),
            Compensation::RemoveVendorDirIfEmpty(dir) => match std::fs::remove_dir(dir) {
                Ok(()) => Ok(()),
                // Something else lives there now; leave it
                Err(_) if dir.exists() => Ok(()),
                Err(e) => Err(e),
            },
            Compensation::RestoreHostManifest(summary) => {
                HostManifestPatcher::restore(summary).map_err(|e| std::io::Error::other(e.to_string()))
            }
        }
    }
}

impl fmt::Display for Compensation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compensation::RemovePackageDir(dir) => write!(f, "remove {}", dir.display()),
            Compensation::RemoveVendorDirIfEmpty(dir) => write!(f, "remove empty {}", dir.display()),
            Compensation::RestoreHostManifest(summary) => write!(f, "restore {}", summary.path.display()),
        }
    }
}

/// Mutable bookkeeping for one run.
struct Run {
    states: Vec<PipelineState>,
    compensations: Vec<Compensation>,
}

impl Run {
    fn new() -> Self {
        Self {
            states: vec![PipelineState::Received],
            compensations: Vec::new(),
        }
    }

    fn advance(&mut self, state: PipelineState) {
        log::debug!("Pipeline: {} -> {}", self.current(), state);
        self.states.push(state);
    }

    fn current(&self) -> PipelineState {
        self.states.last().copied().unwrap_or(PipelineState::Received)
    }

    fn fail(mut self, error: InstallError, compensate: bool) -> InstallFailure {
        let kind = error.kind();
        log::warn!("Installation failed at {}: {}", self.current(), error);
        self.states.push(PipelineState::Failed(kind));

        let mut rolled_back = Vec::new();
        if compensate {
            while let Some(action) = self.compensations.pop() {
                log::info!("Rolling back: {}", action);
                match action.run() {
                    Ok(()) => rolled_back.push(action.to_string()),
                    Err(e) => log::warn!("Rollback step '{}' failed: {}", action, e),
                }
            }
        }

        InstallFailure {
            error,
            states: self.states,
            rolled_back,
        }
    }
}

/// Installs packages from uploaded archives.
pub struct InstallPipeline {
    config: InstallConfig,
    resolver: Arc<dyn DependencyResolver>,
}

impl InstallPipeline {
    /// Pipeline using the `composer` binary from the config.
    pub fn new(config: InstallConfig) -> Self {
        let resolver = ComposerResolver::new(config.composer_binary.clone())
            .with_args(config.composer_args.clone())
            .with_timeout(config.process_timeout);
        Self::with_resolver(config, Arc::new(resolver))
    }

    pub fn with_resolver(config: InstallConfig, resolver: Arc<dyn DependencyResolver>) -> Self {
        Self { config, resolver }
    }

    pub fn config(&self) -> &InstallConfig {
        &self.config
    }

    pub fn planner(&self) -> InstallationPlanner {
        InstallationPlanner::new(&self.config.base_dir, self.config.packages_root())
    }

    /// Install `upload`, stopping at the first failing stage.
    pub fn run(&self, upload: &UploadedArchive) -> std::result::Result<InstallOutcome, InstallFailure> {
        let mut run = Run::new();
        log::info!("Installing {}", upload.display_name());

        // Reject before touching the filesystem
        if !media_type_matches(upload.media_type(), &self.config.expected_media_type) {
            let error = InstallError::InvalidMimeType {
                expected: self.config.expected_media_type.clone(),
                actual: upload.media_type().to_string(),
            };
            return Err(run.fail(error, false));
        }
        run.advance(PipelineState::MimeValidated);

        let mut archive = match ArchiveReader::open(upload.path()) {
            Ok(archive) => archive,
            Err(e) => return Err(run.fail(e, false)),
        };
        run.advance(PipelineState::Opened);

        // Identity is read once here and handed to every later stage
        let identity = match read_identity(&mut archive) {
            Ok(identity) => identity,
            Err(e) => return Err(run.fail(e, false)),
        };
        run.advance(PipelineState::ManifestFound);
        log::info!("Found package {}", identity);

        let planner = self.planner();
        let target = planner.plan_target(&identity);
        run.advance(PipelineState::TargetResolved);

        if planner.collision_check(&target) {
            let error = InstallError::TargetCollision {
                path: PathBuf::from(&target.relative_package_dir),
            };
            return Err(run.fail(error, false));
        }
        run.advance(PipelineState::CollisionChecked);

        if self.config.dry_run {
            log::info!("Dry run: {} would be installed into {}", identity, target.package_dir.display());
            archive.close();
            run.advance(PipelineState::Succeeded);
            return Ok(InstallOutcome {
                identity,
                target,
                requirement_added: false,
                repository_added: false,
                tool_output: None,
                states: run.states,
                dry_run: true,
            });
        }

        let report = match Extractor::extract(&mut archive, &target) {
            Ok(report) => report,
            Err(e) => return Err(run.fail(e, true)),
        };
        archive.close();
        if report.created_vendor_dir {
            run.compensations.push(Compensation::RemoveVendorDirIfEmpty(target.vendor_dir.clone()));
        }
        run.compensations.push(Compensation::RemovePackageDir(report.package_dir.clone()));
        run.advance(PipelineState::Extracted);

        let request = PatchRequest {
            package_name: identity.full_name().to_string(),
            constraint: self.config.default_constraint.clone(),
            repository_url: target.repository_url(),
            policy: self.config.repository_policy,
        };
        let summary = match HostManifestPatcher::apply(&self.config.manifest_path(), &request) {
            Ok(summary) => summary,
            Err(e) => return Err(run.fail(e, true)),
        };
        let (requirement_added, repository_added) = (summary.requirement_added, summary.repository_added);
        if requirement_added || repository_added {
            run.compensations.push(Compensation::RestoreHostManifest(summary));
        }
        run.advance(PipelineState::ManifestPatched);

        let mut tool_output = None;
        if self.config.run_update {
            match self.resolver.update(identity.name(), &self.config.base_dir) {
                Ok(output) => tool_output = Some(output),
                Err(e) => return Err(run.fail(e, self.config.rollback_on_tool_failure)),
            }
            run.advance(PipelineState::ExternalInvoked);
        }

        run.advance(PipelineState::Succeeded);
        log::info!("Installed {} into {}", identity, target.package_dir.display());

        Ok(InstallOutcome {
            identity,
            target,
            requirement_added,
            repository_added,
            tool_output,
            states: run.states,
            dry_run: false,
        })
    }
}

/// Locate and parse the package manifest inside an archive.
pub fn read_identity(archive: &mut ArchiveReader) -> Result<PackageIdentity> {
    let entry = archive.locate(MANIFEST_FILE).ok_or_else(|| InstallError::ManifestMissing {
        file: MANIFEST_FILE.to_string(),
    })?;
    log::debug!("Reading {}", entry.name());

    let bytes = archive.read(&entry)?;
    let doc = manifest::parse(&bytes)?;
    PackageIdentity::from_manifest(&doc)
}
