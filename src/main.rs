//! zipcheck CLI
//!
//! Entry point for the `zipcheck` command-line tool.

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::error;

use zipcheck::config::Settings;
use zipcheck::pipeline::Pipeline;
use zipcheck::workspace::{RetentionPolicy, Workspace};
use zipcheck::{logging, server};
use zipcheck_archive::{ArchiveBuilder, Extractor};

#[derive(Parser)]
#[command(name = "zipcheck")]
#[command(about = "Upload, unpack and statically analyze ZIP archives", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP endpoints
    Serve {
        /// Config file (default: ./zipcheck.toml when present)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Listen address, overrides server.bind
        #[arg(long)]
        bind: Option<String>,

        /// Workspace root, overrides workspace.root
        #[arg(long)]
        workspace: Option<PathBuf>,
    },

    /// Run one pipeline pass against the current upload
    Run {
        /// Config file (default: ./zipcheck.toml when present)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Workspace root, overrides workspace.root
        #[arg(long)]
        workspace: Option<PathBuf>,
    },

    /// Extract an archive into a directory
    Extract {
        archive: PathBuf,
        dest: PathBuf,
    },

    /// Build a deterministic archive of a directory
    Pack {
        dir: PathBuf,

        /// Output file
        #[arg(long, short = 'o')]
        output: PathBuf,
    },

    /// Apply the retention policy to the extraction root
    Gc {
        /// Config file (default: ./zipcheck.toml when present)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init("info");

    let code = match cli.command {
        Commands::Serve {
            config,
            bind,
            workspace,
        } => run_serve(config, bind, workspace),
        Commands::Run { config, workspace } => run_pipeline(config, workspace),
        Commands::Extract { archive, dest } => run_extract(&archive, &dest),
        Commands::Pack { dir, output } => run_pack(&dir, &output),
        Commands::Gc { config } => run_gc(config),
    };

    process::exit(code);
}

fn cli_overrides(bind: Option<String>, workspace: Option<PathBuf>) -> Value {
    json!({
        "server": { "bind": bind },
        "workspace": { "root": workspace.map(|p| p.to_string_lossy().into_owned()) }
    })
}

fn load_settings(config: Option<PathBuf>, overrides: Value) -> Option<Settings> {
    match Settings::load(config.as_deref(), Some(overrides)) {
        Ok(loaded) => Some(loaded.settings),
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            eprintln!("Error loading config: {}", e);
            None
        }
    }
}

fn run_serve(config: Option<PathBuf>, bind: Option<String>, workspace: Option<PathBuf>) -> i32 {
    let Some(settings) = load_settings(config, cli_overrides(bind, workspace)) else {
        return 2;
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error starting runtime: {}", e);
            return 1;
        }
    };

    match runtime.block_on(server::serve(&settings)) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn run_pipeline(config: Option<PathBuf>, workspace: Option<PathBuf>) -> i32 {
    let Some(settings) = load_settings(config, cli_overrides(None, workspace)) else {
        return 2;
    };

    let report = Pipeline::from_settings(&settings).run();
    let body = report.body();
    if report.is_done() {
        print!("{}", body);
    } else {
        eprint!("{}", body);
    }
    report.exit_code()
}

fn run_extract(archive: &Path, dest: &Path) -> i32 {
    match Extractor::new().extract(archive, dest) {
        Ok(report) => {
            println!(
                "extracted {} files, {} directories, {} bytes into {}",
                report.files,
                report.directories,
                report.bytes_written,
                dest.display()
            );
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn run_pack(dir: &Path, output: &Path) -> i32 {
    let result = match ArchiveBuilder::new(dir).build() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    if let Err(e) = result.write_to(output) {
        eprintln!("Error writing {}: {}", output.display(), e);
        return 1;
    }

    println!(
        "wrote {} ({} entries, {} bytes, sha256 {})",
        output.display(),
        result.entries.len(),
        result.size(),
        result.sha256
    );
    0
}

fn run_gc(config: Option<PathBuf>) -> i32 {
    let Some(settings) = load_settings(config, cli_overrides(None, None)) else {
        return 2;
    };

    let workspace = Workspace::from_settings(&settings);
    let policy = RetentionPolicy::from_settings(&settings);

    let _lock = match workspace.lock() {
        Ok(lock) => lock,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    match policy.apply(workspace.extract_root(), None) {
        Ok(report) => {
            println!(
                "scanned {} destinations, kept {}, removed {}",
                report.scanned,
                report.kept,
                report.removed.len()
            );
            for err in &report.errors {
                eprintln!("warning: {}", err);
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}
