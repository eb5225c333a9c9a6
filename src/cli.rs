// Command line interface module
// Handles parsing and validation of command line arguments

use anyhow::{bail, Result};
use clap::Parser;
use rspin_loader::DEFAULT_MAX_WORKERS;
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound on the worker count accepted from the command line
const MAX_WORKERS: usize = 1024;

/// Upper bound on the scale factor, keeps resize allocations bounded
const MAX_SCALE: f32 = 16.0;

/// rspin-loader - Load images in the background the way the rspin viewer does
#[derive(Parser, Debug)]
#[command(name = "rspin-loader")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Image locators: http(s) URLs or file paths
    #[arg(value_name = "LOCATOR", required = true)]
    pub locators: Vec<String>,

    /// Maximum number of images loaded at the same time
    #[arg(short, long, default_value_t = DEFAULT_MAX_WORKERS, value_parser = parse_workers)]
    pub workers: usize,

    /// Directory that relative file locators are resolved against
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// HTTP request timeout in seconds (no timeout when omitted)
    #[arg(long, value_name = "SECS")]
    pub http_timeout: Option<u64>,

    /// Stop waiting for loads after this many seconds
    #[arg(long, value_name = "SECS")]
    pub deadline: Option<u64>,

    /// Scale factor for loaded images (e.g., 0.5 for half size, 2.0 for double)
    #[arg(short, long, default_value = "1.0", value_parser = parse_scale)]
    pub scale: f32,
}

/// Validated arguments
#[derive(Debug)]
pub struct ParsedArgs {
    pub locators: Vec<String>,
    pub workers: usize,
    pub root: Option<PathBuf>,
    pub http_timeout: Option<Duration>,
    pub deadline: Option<Duration>,
    pub scale: f32,
}

/// Parse worker count and ensure it's within valid range
fn parse_workers(s: &str) -> Result<usize, String> {
    let workers: usize = s.parse().map_err(|_| "Invalid worker count")?;
    if !(1..=MAX_WORKERS).contains(&workers) {
        return Err(format!("Worker count must be between 1 and {}", MAX_WORKERS));
    }
    Ok(workers)
}

/// Parse scale factor and ensure it's within valid range
fn parse_scale(s: &str) -> Result<f32, String> {
    let scale: f32 = s.parse().map_err(|_| "Invalid scale value")?;
    if !(scale.is_finite() && scale > 0.0 && scale <= MAX_SCALE) {
        return Err(format!("Scale must be greater than 0 and at most {}", MAX_SCALE));
    }
    Ok(scale)
}

impl ParsedArgs {
    fn from_args(args: Args) -> Result<Self> {
        if let Some(ref root) = args.root {
            if !root.is_dir() {
                bail!("Root directory does not exist: {}", root.display());
            }
        }

        Ok(ParsedArgs {
            locators: args.locators,
            workers: args.workers,
            root: args.root,
            http_timeout: args.http_timeout.map(Duration::from_secs),
            deadline: args.deadline.map(Duration::from_secs),
            scale: args.scale,
        })
    }
}

/// Parse and validate command line arguments
pub fn parse_args() -> Result<ParsedArgs> {
    ParsedArgs::from_args(Args::parse())
}
