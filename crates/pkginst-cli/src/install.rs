//! Install command - install a package from a zip archive.

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;

use pkginst::{InstallPipeline, RepositoryPolicy, UploadedArchive, SUCCESS_MESSAGE};

use crate::config::PkginstConfig;

#[derive(Args, Debug)]
pub struct InstallArgs {
    /// Zip archive containing the package
    #[arg(value_name = "ARCHIVE")]
    pub archive: PathBuf,

    /// Declared media type of the archive (detected from its content when omitted)
    #[arg(long, value_name = "TYPE")]
    pub mime_type: Option<String>,

    /// Application root holding composer.json
    #[arg(short = 'd', long, default_value = ".")]
    pub working_dir: PathBuf,

    /// Directory receiving packages, relative to the application root
    #[arg(long, value_name = "DIR")]
    pub packages_dir: Option<PathBuf>,

    /// Composer executable
    #[arg(long, value_name = "BIN")]
    pub composer_bin: Option<PathBuf>,

    /// Seconds before composer is killed (0 = no limit)
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Do not run composer update after patching composer.json
    #[arg(long)]
    pub no_update: bool,

    /// Only validate the archive and show where it would be installed
    #[arg(long)]
    pub dry_run: bool,

    /// Do not add a path repository whose url is already declared
    #[arg(long)]
    pub dedupe_repositories: bool,

    /// Undo extraction and composer.json changes when composer fails
    #[arg(long)]
    pub rollback_on_failure: bool,
}

pub async fn execute(args: InstallArgs) -> Result<i32> {
    let working_dir = args.working_dir.canonicalize()
        .context("Failed to resolve working directory")?;

    let mut file_config = PkginstConfig::load(&working_dir)?.unwrap_or_default();
    file_config.apply_env();
    let mut config = file_config.to_install_config(&working_dir);

    // Command line flags win over pkginst.toml and the environment
    if let Some(dir) = args.packages_dir {
        config.packages_dir = dir;
    }
    if let Some(bin) = args.composer_bin {
        config.composer_binary = bin;
    }
    if let Some(secs) = args.timeout {
        config.process_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    if args.dedupe_repositories {
        config.repository_policy = RepositoryPolicy::DeduplicateByUrl;
    }
    config.rollback_on_tool_failure |= args.rollback_on_failure;
    config.run_update = !args.no_update;
    config.dry_run = args.dry_run;

    if !config.manifest_path().exists() {
        eprintln!("{} No composer.json found in {}",
            style("Error:").red().bold(),
            working_dir.display()
        );
        return Ok(1);
    }

    let upload = match args.mime_type {
        Some(mime_type) => UploadedArchive::new(&args.archive, mime_type),
        None => UploadedArchive::detect(&args.archive)
            .with_context(|| format!("Failed to read {}", args.archive.display()))?,
    };

    println!("{} Installing {}", style("Package").green().bold(), style(upload.display_name()).white().bold());
    if config.dry_run {
        println!("{} Running in dry-run mode", style("Info:").cyan());
    }

    let spinner = create_spinner("Installing package...");
    let pipeline = InstallPipeline::new(config);

    // The pipeline blocks for as long as composer runs
    let result = tokio::task::spawn_blocking(move || pipeline.run(&upload))
        .await
        .context("Installation task panicked")?;
    spinner.finish_and_clear();

    match result {
        Ok(outcome) => {
            println!("  {} {} {}",
                style("+").green(),
                style(outcome.identity.full_name()).white().bold(),
                style(&outcome.target.relative_package_dir).dim()
            );

            if outcome.dry_run {
                println!("{} {} can be installed into {}",
                    style("Info:").cyan(),
                    outcome.identity,
                    outcome.target.package_dir.display()
                );
                return Ok(0);
            }

            if !outcome.requirement_added {
                println!("{} {} was already required", style("Info:").cyan(), outcome.identity);
            }
            if let Some(output) = &outcome.tool_output {
                print_tool_output(&output.combined());
            } else {
                println!("{} Skipped composer update; run 'composer update {}' to finish",
                    style("Info:").cyan(),
                    outcome.identity.name()
                );
            }

            println!("{} {}", style("Success:").green().bold(), SUCCESS_MESSAGE);
            Ok(0)
        }
        Err(failure) => {
            if let Some(output) = failure.error.tool_output() {
                print_tool_output(&output.combined());
            }
            eprintln!("{} {}", style("Error:").red().bold(), failure.error.message());
            log::debug!("{} ({})", failure.error, failure.error.code());
            for action in &failure.rolled_back {
                eprintln!("  {} {}", style("-").red(), style(action).dim());
            }
            Ok(1)
        }
    }
}

fn print_tool_output(output: &str) {
    for line in output.lines() {
        println!("  {}", style(line).dim());
    }
}

fn create_spinner(message: &str) -> ProgressBar {
    if !console::Term::stderr().is_term() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new_spinner();
    if let Ok(spinner_style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(spinner_style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
