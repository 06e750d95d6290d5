//! Patching the host application's composer.json.
//!
//! The requirement and the path repository are written in one
//! read-modify-write cycle, under an advisory lock on a sibling lock file,
//! so concurrent installations cannot lose each other's updates.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use fslock::LockFile;
use serde_json::{json, Map, Value};

use crate::error::{InstallError, Result};
use crate::manifest::{self, ManifestDocument};

/// How to treat a path repository whose url is already declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepositoryPolicy {
    /// Always append a new entry, even if an identical one exists
    #[default]
    Append,
    /// Skip the entry when a repository with the same url is present
    DeduplicateByUrl,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("'{0}' must be an object")]
    NotAnObject(&'static str),

    #[error("'repositories' must be an array or an object")]
    InvalidRepositories,
}

/// Require `full_name` with `constraint` unless it is already required.
///
/// An existing constraint is never overwritten. Returns whether the document changed.
pub fn add_requirement(
    doc: &mut ManifestDocument,
    full_name: &str,
    constraint: &str,
) -> std::result::Result<bool, PatchError> {
    let require = object_entry(doc.root_mut(), "require")?;

    if require.contains_key(full_name) {
        return Ok(false);
    }

    require.insert(full_name.to_string(), Value::String(constraint.to_string()));
    Ok(true)
}

/// Declare a `path` repository with the given url.
///
/// Object-style `repositories` get the entry under `key`. Returns whether the document changed.
pub fn add_local_repository(
    doc: &mut ManifestDocument,
    url: &str,
    key: &str,
    policy: RepositoryPolicy,
) -> std::result::Result<bool, PatchError> {
    let root = doc.root_mut();
    if matches!(root.get("repositories"), None | Some(Value::Null)) {
        root.insert("repositories".to_string(), Value::Array(Vec::new()));
    }

    let entry = json!({ "type": "path", "url": url });
    let has_url = |repo: &Value| repo.get("url").and_then(Value::as_str) == Some(url);

    match root.get_mut("repositories") {
        Some(Value::Array(repos)) => {
            if policy == RepositoryPolicy::DeduplicateByUrl && repos.iter().any(has_url) {
                return Ok(false);
            }
            repos.push(entry);
            Ok(true)
        }
        Some(Value::Object(repos)) => {
            if repos.contains_key(key)
                || (policy == RepositoryPolicy::DeduplicateByUrl && repos.values().any(has_url))
            {
                return Ok(false);
            }
            repos.insert(key.to_string(), entry);
            Ok(true)
        }
        _ => Err(PatchError::InvalidRepositories),
    }
}

/// Remove the requirement written by [`add_requirement`], if it is still unchanged.
pub fn remove_requirement(doc: &mut ManifestDocument, full_name: &str, constraint: &str) -> bool {
    let Some(Value::Object(require)) = doc.root_mut().get_mut("require") else {
        return false;
    };
    if require.get(full_name).and_then(Value::as_str) != Some(constraint) {
        return false;
    }
    require.shift_remove(full_name).is_some()
}

/// Remove one repository entry written by [`add_local_repository`].
///
/// For list-style `repositories` the last matching entry goes.
pub fn remove_local_repository(doc: &mut ManifestDocument, url: &str, key: &str) -> bool {
    let entry = json!({ "type": "path", "url": url });

    match doc.root_mut().get_mut("repositories") {
        Some(Value::Array(repos)) => match repos.iter().rposition(|repo| *repo == entry) {
            Some(index) => {
                repos.remove(index);
                true
            }
            None => false,
        },
        Some(Value::Object(repos)) if repos.get(key) == Some(&entry) => repos.shift_remove(key).is_some(),
        _ => false,
    }
}

fn object_entry<'a>(
    root: &'a mut Map<String, Value>,
    key: &'static str,
) -> std::result::Result<&'a mut Map<String, Value>, PatchError> {
    if matches!(root.get(key), None | Some(Value::Null)) {
        root.insert(key.to_string(), Value::Object(Map::new()));
    }

    match root.get_mut(key) {
        Some(Value::Object(map)) => Ok(map),
        _ => Err(PatchError::NotAnObject(key)),
    }
}

/// Write a manifest over `path`, replacing the whole file atomically.
pub fn persist(doc: &ManifestDocument, path: &Path) -> Result<()> {
    write_atomically(path, &manifest::serialize(doc))
}

fn write_atomically(path: &Path, content: &[u8]) -> Result<()> {
    let failed = |e: std::io::Error| InstallError::patch(path, e.to_string());
    let dir = parent_dir(path);

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(failed)?;
    tmp.write_all(content).map_err(failed)?;
    tmp.as_file().sync_all().map_err(failed)?;

    // Keep the mode of the file being replaced
    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(tmp.path(), meta.permissions()).map_err(failed)?;
    }

    tmp.persist(path).map_err(|e| failed(e.error))?;
    Ok(())
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Everything one installation writes into the host manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRequest {
    pub package_name: String,
    pub constraint: String,
    pub repository_url: String,
    pub policy: RepositoryPolicy,
}

/// Outcome of [`HostManifestPatcher::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSummary {
    pub path: PathBuf,
    pub request: PatchRequest,
    pub requirement_added: bool,
    pub repository_added: bool,
    /// File content before the patch
    pub original: Vec<u8>,
    /// File content right after the patch
    pub patched: Vec<u8>,
}

/// Exclusive advisory lock on a manifest, released on drop.
#[derive(Debug)]
pub struct ManifestLock {
    #[allow(dead_code)]
    lock: LockFile,
    lock_path: PathBuf,
}

impl ManifestLock {
    /// Block until the lock for `manifest_path` is held.
    pub fn acquire(manifest_path: &Path) -> Result<Self> {
        let lock_path = lock_path_for(manifest_path);

        let mut lock = LockFile::open(&lock_path).map_err(|e| {
            InstallError::patch(manifest_path, format!("failed to open lock file {}: {}", lock_path.display(), e))
        })?;
        lock.lock().map_err(|e| {
            InstallError::patch(manifest_path, format!("failed to lock {}: {}", lock_path.display(), e))
        })?;

        log::trace!("Locked {}", lock_path.display());
        Ok(Self { lock, lock_path })
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

/// `.composer.json.lock` next to `composer.json`.
fn lock_path_for(manifest_path: &Path) -> PathBuf {
    let file_name = manifest_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "manifest".to_string());
    parent_dir(manifest_path).join(format!(".{}.lock", file_name))
}

/// Applies installation patches to a host manifest file.
pub struct HostManifestPatcher;

impl HostManifestPatcher {
    /// Add the requirement and the repository in a single locked cycle.
    pub fn apply(manifest_path: &Path, request: &PatchRequest) -> Result<PatchSummary> {
        let _lock = ManifestLock::acquire(manifest_path)?;

        let original = fs::read(manifest_path).map_err(|e| InstallError::patch(manifest_path, e.to_string()))?;
        let mut doc = manifest::parse(&original)
            .map_err(|e| InstallError::patch(manifest_path, e.to_string()))?;

        let shape_error = |e: PatchError| InstallError::patch(manifest_path, e.to_string());
        let requirement_added = add_requirement(&mut doc, &request.package_name, &request.constraint)
            .map_err(shape_error)?;
        let repository_added = add_local_repository(
            &mut doc,
            &request.repository_url,
            &request.package_name,
            request.policy,
        )
        .map_err(shape_error)?;

        let patched = if requirement_added || repository_added {
            let bytes = manifest::serialize(&doc);
            write_atomically(manifest_path, &bytes)?;
            bytes
        } else {
            original.clone()
        };

        log::debug!(
            "Patched {} (requirement added: {}, repository added: {})",
            manifest_path.display(),
            requirement_added,
            repository_added
        );

        Ok(PatchSummary {
            path: manifest_path.to_path_buf(),
            request: request.clone(),
            requirement_added,
            repository_added,
            original,
            patched,
        })
    }

    /// Undo a patch.
    ///
    /// If nobody touched the file since [`apply`](Self::apply), the original
    /// bytes come back verbatim. Otherwise only the entries this patch added
    /// are removed, keeping whatever others wrote in between.
    pub fn restore(summary: &PatchSummary) -> Result<()> {
        let path = summary.path.as_path();
        let _lock = ManifestLock::acquire(path)?;

        let current = fs::read(path).map_err(|e| InstallError::patch(path, e.to_string()))?;
        if current == summary.patched {
            return write_atomically(path, &summary.original);
        }

        log::debug!("{} changed since it was patched, removing only our entries", path.display());
        let mut doc = manifest::parse(&current).map_err(|e| InstallError::patch(path, e.to_string()))?;
        let request = &summary.request;

        let mut changed = false;
        if summary.requirement_added {
            changed |= remove_requirement(&mut doc, &request.package_name, &request.constraint);
        }
        if summary.repository_added {
            changed |= remove_local_repository(&mut doc, &request.repository_url, &request.package_name);
        }

        if changed {
            persist(&doc, path)?;
        }
        Ok(())
    }
}
