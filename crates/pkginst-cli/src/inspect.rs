//! Inspect command - read the package manifest out of an archive.

use anyhow::Result;
use clap::Args;
use console::style;
use std::path::PathBuf;

use pkginst::pipeline::read_identity;
use pkginst::upload::{media_type_matches, ZIP_MEDIA_TYPE};
use pkginst::{ArchiveReader, InstallError, UploadedArchive};

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Zip archive to inspect
    #[arg(value_name = "ARCHIVE")]
    pub archive: PathBuf,

    /// Declared media type of the archive (detected from its content when omitted)
    #[arg(long, value_name = "TYPE")]
    pub mime_type: Option<String>,
}

pub fn execute(args: InspectArgs) -> Result<i32> {
    let upload = match args.mime_type {
        Some(mime_type) => UploadedArchive::new(&args.archive, mime_type),
        None => UploadedArchive::detect(&args.archive)?,
    };

    match inspect(&upload) {
        Ok(()) => Ok(0),
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e.message());
            log::debug!("{} ({})", e, e.code());
            Ok(1)
        }
    }
}

fn inspect(upload: &UploadedArchive) -> pkginst::Result<()> {
    if !media_type_matches(upload.media_type(), ZIP_MEDIA_TYPE) {
        return Err(InstallError::InvalidMimeType {
            expected: ZIP_MEDIA_TYPE.to_string(),
            actual: upload.media_type().to_string(),
        });
    }

    let mut archive = ArchiveReader::open(upload.path())?;
    let identity = read_identity(&mut archive)?;
    let root = archive.top_level_directory_name()?;

    println!("{} {}", style("name     :").bold(), style(identity.full_name()).green());
    println!("{} {}", style("vendor   :").bold(), identity.vendor());
    println!("{} {}", style("package  :").bold(), identity.name());
    println!("{} {}", style("root dir :").bold(), root);
    println!("{} {}", style("entries  :").bold(), archive.len());

    if !archive.is_single_rooted() {
        println!("{} Entries outside '{}/' would make extraction fail",
            style("Warning:").yellow().bold(),
            root
        );
    }

    Ok(())
}
