use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use super::codec::ManifestDocument;
use crate::error::{InstallError, Result};

lazy_static! {
    /// A vendor or package segment that is safe to use as a directory name.
    static ref PATH_SAFE_TOKEN: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap();
}

/// `vendor/name` identity of a package.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageIdentity {
    full_name: String,
    vendor: String,
    name: String,
}

impl PackageIdentity {
    /// Parse `vendor/name`. Exactly one separator and two path-safe segments are required.
    pub fn parse(full_name: &str) -> Result<Self> {
        let malformed = |reason: String| InstallError::MalformedManifest { reason };

        let parts: Vec<&str> = full_name.split('/').collect();
        if parts.len() != 2 {
            return Err(malformed(format!(
                "package name '{}' must have the form vendor/package",
                full_name
            )));
        }

        let (vendor, name) = (parts[0], parts[1]);
        for segment in [vendor, name] {
            if !PATH_SAFE_TOKEN.is_match(segment) {
                return Err(malformed(format!(
                    "'{}' in package name '{}' is not a valid directory name",
                    segment, full_name
                )));
            }
        }

        Ok(Self {
            full_name: full_name.to_string(),
            vendor: vendor.to_string(),
            name: name.to_string(),
        })
    }

    /// Read the identity from the `name` field of a package manifest.
    pub fn from_manifest(doc: &ManifestDocument) -> Result<Self> {
        match doc.get("name") {
            Some(Value::String(name)) => Self::parse(name),
            Some(other) => Err(InstallError::MalformedManifest {
                reason: format!("'name' must be a string, got {}", other),
            }),
            None => Err(InstallError::MalformedManifest {
                reason: "missing 'name' field".to_string(),
            }),
        }
    }

    /// `vendor/name`, as used for the requirement key.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    /// Package name without the vendor, as passed to `composer update`.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name)
    }
}
