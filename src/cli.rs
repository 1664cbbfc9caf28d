//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Capture web pages into self-contained offline bundles.
///
/// Every URL is captured as one entry: the page HTML, its images, scripts,
/// stylesheets (followed recursively) and hosted videos are downloaded and the
/// HTML is rewritten to point at the local copies.
#[derive(Parser, Debug)]
#[command(name = "offline-capture")]
#[command(author, version, about)]
pub struct Args {
    /// Pages to capture
    #[arg(required = true, value_name = "URL")]
    pub urls: Vec<String>,

    /// Directory bundles are written into [default: current directory]
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Maximum pages captured at once (1-32) [default: 3]
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=32))]
    pub concurrency: Option<u8>,

    /// SQLite file keeping entry state between runs; in-memory when omitted
    #[arg(long, value_name = "FILE")]
    pub db: Option<PathBuf>,

    /// Skip loading the default config file
    #[arg(long)]
    pub no_config: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Tracing filter implied by the flags, if any was given.
    #[must_use]
    pub fn log_level(&self) -> Option<&'static str> {
        if self.quiet {
            return Some("error");
        }
        match self.verbose {
            0 => None,
            1 => Some("debug"),
            _ => Some("trace"),
        }
    }
}
