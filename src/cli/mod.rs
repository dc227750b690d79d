//! CLI commands.

mod start;
mod targets;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "jshunter")]
#[command(about = "JavaScript reconnaissance pipeline")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the JSHunter server for a target
    Start {
        /// Target name
        #[arg(short = 't', long)]
        target: String,

        /// Port to run the server
        #[arg(short = 'p', long, default_value_t = crate::config::DEFAULT_PORT)]
        port: u16,

        /// Storage directory for target data
        #[arg(short = 's', long)]
        storage_dir: Option<PathBuf>,

        /// Enable mobile extraction
        #[arg(long)]
        mobile: bool,

        /// Force reinstallation of the helper binaries
        #[arg(long)]
        force: bool,

        /// Maximum concurrent browser instances for extraction
        #[arg(short = 'b', long, default_value_t = 4)]
        concurrent_browsers: usize,

        /// Maximum concurrent prettify workers
        #[arg(short = 'r', long, default_value_t = 8)]
        concurrent_prettify: usize,

        /// Maximum concurrent sourcemap workers
        #[arg(short = 'm', long, default_value_t = 4)]
        concurrent_sourcemaps: usize,

        /// Maximum concurrent analysis workers
        #[arg(short = 'a', long, default_value_t = 6)]
        concurrent_analysis: usize,

        /// Maximum concurrent dechunker workers
        #[arg(short = 'd', long, default_value_t = 4)]
        concurrent_dechunker: usize,
    },

    /// List configured targets with their storage usage
    Targets,

    /// Print version and build information
    Version,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            target,
            port,
            storage_dir,
            mobile,
            force,
            concurrent_browsers,
            concurrent_prettify,
            concurrent_sourcemaps,
            concurrent_analysis,
            concurrent_dechunker,
        } => {
            start::run(start::StartArgs {
                target,
                port,
                storage_dir,
                mobile,
                force,
                concurrent_browsers,
                concurrent_prettify,
                concurrent_sourcemaps,
                concurrent_analysis,
                concurrent_dechunker,
            })
            .await
        }
        Commands::Targets => targets::run(),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

fn print_version() {
    println!("jshunter {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  build time: {}",
        option_env!("JSHUNTER_BUILD_TIME").unwrap_or("unknown")
    );
    println!(
        "  git commit: {}",
        option_env!("JSHUNTER_GIT_COMMIT").unwrap_or("unknown")
    );
}
