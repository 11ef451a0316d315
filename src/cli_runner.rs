//! Glue between the parsed command line and the library: picks the streams,
//! installs logging and runs the requested operation.

use std::error::Error;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tracing_subscriber::EnvFilter;

use crate::cli::{self, Commands};
use crate::error::ArchiverError;
use crate::{archive, extract, list_files};

/// Public entry for the `streamarch` binary.
pub fn run_cli_app() -> Result<(), Box<dyn Error>> {
    let args = cli::run();
    init_logging(args.verbose);

    let options = args.command.archive_options();
    match args.command {
        Commands::Create { inputs, output, .. } => {
            let options = options.ok_or("create command without pipeline options")?;
            let sink: Box<dyn Write + Send> = match &output {
                Some(path) => Box::new(File::create(path).map_err(|e| ArchiverError::io(e, path))?),
                None => Box::new(io::stdout()),
            };
            archive(&inputs, sink, &options)?;
        }
        Commands::Extract { input, directory } => {
            extract(open_input(input.as_deref())?, &directory)?;
        }
        Commands::List { input } => {
            let files = list_files(open_input(input.as_deref())?)?;
            let mut out = io::stdout().lock();
            for file in files {
                writeln!(out, "{}\t{}", file.size, file.path)?;
            }
            out.flush()?;
        }
    }
    Ok(())
}

fn open_input(path: Option<&Path>) -> Result<Box<dyn Read>, ArchiverError> {
    Ok(match path {
        Some(path) => Box::new(File::open(path).map_err(|e| ArchiverError::io(e, PathBuf::from(path)))?),
        None => Box::new(io::stdin().lock()),
    })
}

/// Logs go to stderr; stdout may be carrying the archive.
fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}
