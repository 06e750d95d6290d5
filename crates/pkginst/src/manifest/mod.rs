//! composer.json handling: the codec shared by package and host manifests,
//! and package identity extraction.

pub mod codec;
mod identity;

pub use codec::{parse, serialize, ManifestDocument};
pub use identity::PackageIdentity;

/// File name of the package manifest, inside archives and at the application root.
pub const MANIFEST_FILE: &str = "composer.json";
