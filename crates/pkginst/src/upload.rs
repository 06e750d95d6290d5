//! Uploaded archive handed to the pipeline by the request layer.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

pub const ZIP_MEDIA_TYPE: &str = "application/zip";
pub const EMPTY_MEDIA_TYPE: &str = "application/x-empty";
pub const OCTET_STREAM_MEDIA_TYPE: &str = "application/octet-stream";

/// Local file header, empty archive and spanned archive signatures.
const ZIP_SIGNATURES: [&[u8; 4]; 3] = [b"PK\x03\x04", b"PK\x05\x06", b"PK\x07\x08"];

/// A file uploaded for installation.
///
/// The pipeline only reads it. Removing the temporary file is up to whoever
/// created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedArchive {
    path: PathBuf,
    media_type: String,
    original_name: Option<String>,
}

impl UploadedArchive {
    /// Wrap an upload whose media type was declared by the client.
    pub fn new(path: impl Into<PathBuf>, media_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            media_type: media_type.into(),
            original_name: None,
        }
    }

    /// Wrap a local file, guessing its media type from the content.
    pub fn detect(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let media_type = sniff_media_type(&path)?;
        Ok(Self::new(path, media_type))
    }

    pub fn with_original_name(mut self, name: impl Into<String>) -> Self {
        self.original_name = Some(name.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// Client-side file name, falling back to the temporary file's name.
    pub fn display_name(&self) -> String {
        match &self.original_name {
            Some(name) => name.clone(),
            None => self
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
        }
    }
}

/// Guess a media type from the first bytes of a file.
pub fn sniff_media_type(path: &Path) -> std::io::Result<String> {
    let mut header = Vec::with_capacity(4);
    File::open(path)?.take(4).read_to_end(&mut header)?;
    Ok(media_type_for_header(&header).to_string())
}

fn media_type_for_header(header: &[u8]) -> &'static str {
    if header.is_empty() {
        return EMPTY_MEDIA_TYPE;
    }

    if ZIP_SIGNATURES.iter().any(|sig| header == &sig[..]) {
        ZIP_MEDIA_TYPE
    } else {
        OCTET_STREAM_MEDIA_TYPE
    }
}

/// Whether the declared media type is exactly the expected one.
pub fn media_type_matches(actual: &str, expected: &str) -> bool {
    actual == expected
}
