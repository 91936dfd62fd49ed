//! ki-browser-host - Browser Process Entry Point
//!
//! Spawned by `OutOfProcessHost`. Speaks JSON-RPC on stdin/stdout, so all
//! logging goes to stderr or the file given with `--log-file`.

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;
use tracing::{debug, info, Level};
use tracing_subscriber::{fmt, fmt::writer::BoxMakeWriter, prelude::*, EnvFilter};

use ki_browser_oop::{
    config::ProcessArgs,
    remote::{
        headless::{DEFAULT_VIEWPORT, MAX_VIEW_DIMENSION},
        BrowserProcess, HeadlessBackend,
    },
    FULL_VERSION, VERSION,
};

/// Build the CLI command parser
fn build_cli() -> Command {
    Command::new("ki-browser-host")
        .version(VERSION)
        .about("Browser process for ki-browser-oop hosts")
        .long_about(
            "Runs browsers on behalf of an out-of-process host.\n\
             Commands are read as newline-delimited JSON-RPC from stdin,\n\
             notifications are written to stdout.",
        )
        .arg(
            Arg::new("parent-process-id")
                .long("parentProcessId")
                .value_name("PID")
                .help("Process id of the host")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("cache-path")
                .long("cachePath")
                .value_name("DIR")
                .help("Browser cache directory")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .value_name("FILE")
                .help("Write logs to FILE instead of stderr")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("remote-thread-id")
                .long("remote-thread-id")
                .value_name("ID")
                .help("Identity reported to the host on startup")
                .default_value("1")
                .value_parser(clap::value_parser!(i32)),
        )
        .arg(
            Arg::new("width")
                .long("width")
                .value_name("PIXELS")
                .help("Initial view width")
                .value_parser(clap::value_parser!(i32).range(1..=MAX_VIEW_DIMENSION as i64)),
        )
        .arg(
            Arg::new("height")
                .long("height")
                .value_name("PIXELS")
                .help("Initial view height")
                .value_parser(clap::value_parser!(i32).range(1..=MAX_VIEW_DIMENSION as i64)),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Only log errors")
                .action(ArgAction::SetTrue)
                .conflicts_with("verbose"),
        )
}

/// Parse CLI arguments into ProcessArgs
fn parse_process_args(matches: &clap::ArgMatches) -> ProcessArgs {
    ProcessArgs {
        parent_process_id: matches.get_one::<u32>("parent-process-id").copied(),
        cache_path: matches.get_one::<PathBuf>("cache-path").cloned(),
        log_file: matches.get_one::<PathBuf>("log-file").cloned(),
        remote_thread_id: matches.get_one::<i32>("remote-thread-id").copied().unwrap_or(1),
    }
}

/// Initialize the tracing/logging subsystem. Never writes to stdout.
fn init_tracing(verbosity: u8, quiet: bool, log_file: Option<&PathBuf>) -> Result<()> {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbosity {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let (writer, ansi) = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            (BoxMakeWriter::new(std::sync::Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_ansi(ansi).with_target(true))
        .with(filter)
        .init();

    Ok(())
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();

    let verbosity = matches.get_count("verbose");
    let quiet = matches.get_flag("quiet");
    let args = parse_process_args(&matches);

    init_tracing(verbosity, quiet, args.log_file.as_ref())?;
    info!("{} starting (parent {:?})", FULL_VERSION, args.parent_process_id);

    if let Some(ref cache_path) = args.cache_path {
        std::fs::create_dir_all(cache_path)
            .with_context(|| format!("Failed to create cache directory {}", cache_path.display()))?;
        debug!("Using cache directory {}", cache_path.display());
    }

    let width = matches.get_one::<i32>("width").copied().unwrap_or(DEFAULT_VIEWPORT.0);
    let height = matches.get_one::<i32>("height").copied().unwrap_or(DEFAULT_VIEWPORT.1);
    let backend = HeadlessBackend::new(args.remote_thread_id).with_viewport(width, height);

    BrowserProcess::new(backend)
        .serve(tokio::io::stdin(), tokio::io::stdout())
        .await
        .context("Browser process failed")?;

    info!("Browser process stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let matches = build_cli()
            .try_get_matches_from([
                "ki-browser-host",
                "--parentProcessId=4242",
                "--cachePath=/tmp/ki-cache",
                "--log-file",
                "/tmp/ki.log",
            ])
            .unwrap();

        let args = parse_process_args(&matches);
        assert_eq!(args.parent_process_id, Some(4242));
        assert_eq!(args.cache_path, Some(PathBuf::from("/tmp/ki-cache")));
        assert_eq!(args.log_file, Some(PathBuf::from("/tmp/ki.log")));
        assert_eq!(args.remote_thread_id, 1);
    }

    #[test]
    fn test_generated_args_round_trip() {
        let mut expected = ProcessArgs::for_parent(7, Some(PathBuf::from("cache")));
        expected.log_file = Some(PathBuf::from("child.log"));

        let mut argv = vec!["ki-browser-host".to_string()];
        argv.extend(expected.to_command_args());
        let matches = build_cli().try_get_matches_from(argv).unwrap();

        assert_eq!(parse_process_args(&matches), expected);
    }

    #[test]
    fn test_cli_conflicts() {
        let result = build_cli().try_get_matches_from(["ki-browser-host", "-v", "--quiet"]);
        assert!(result.is_err());

        let result = build_cli().try_get_matches_from(["ki-browser-host", "--width=0"]);
        assert!(result.is_err());

        let result = build_cli().try_get_matches_from(["ki-browser-host", "--height=100000"]);
        assert!(result.is_err());

        let matches = build_cli()
            .try_get_matches_from(["ki-browser-host", "--width=8192"])
            .unwrap();
        assert_eq!(matches.get_one::<i32>("width"), Some(&MAX_VIEW_DIMENSION));
    }
}
