use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use runway::cli::commands::{self, RunCommand};
use runway::logging;
use runway::project::Workspace;
use runway::project::settings::level_filter;
use runway::runner::dispatch::CancelToken;

#[derive(Parser)]
#[command(name = "runway", about = "Run project test suites across browsers, data sets and environments", version)]
struct Cli {
    /// Workspace root holding `projects/` and the global settings.
    #[arg(long, global = true, default_value = ".")]
    workspace: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a suite, a test or a directory of tests
    Run {
        project: String,

        /// Suite name, test id, or test directory (`.` for all tests)
        target: String,

        /// Browsers to run with (repeat or comma-separate)
        #[arg(short, long)]
        browsers: Vec<String>,

        /// Environments to run in (repeat or comma-separate)
        #[arg(short, long)]
        environments: Vec<String>,

        /// Number of units run in parallel
        #[arg(short, long)]
        processes: Option<usize>,

        /// Tag expressions, e.g. `smoke`, `a,b`, `NOT slow`
        #[arg(short, long)]
        tags: Vec<String>,

        /// Extra report formats: json, junit
        #[arg(short, long)]
        report: Vec<String>,

        /// Also write report copies into this folder
        #[arg(long)]
        report_folder: Option<PathBuf>,

        /// File stem of the report copies (default: the timestamp)
        #[arg(long)]
        report_name: Option<String>,

        /// Execution timestamp to use instead of the current time
        #[arg(long)]
        timestamp: Option<String>,

        /// DEBUG, INFO, WARNING, ERROR or CRITICAL
        #[arg(long)]
        cli_log_level: Option<String>,
    },

    /// Print the execution data of a past run as JSON
    Report {
        project: String,

        /// Suite name, or test id for single-test runs
        execution: String,

        timestamp: String,
    },
}

fn log_filter(workspace: &Path, project: &str, cli_level: Option<&str>) -> &'static str {
    if let Some(level) = cli_level {
        return level_filter(level);
    }
    Workspace::new(workspace)
        .project(project)
        .and_then(|p| p.settings())
        .ok()
        .and_then(|s| s.log_filter())
        .unwrap_or("info")
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            project,
            target,
            browsers,
            environments,
            processes,
            tags,
            report,
            report_folder,
            report_name,
            timestamp,
            cli_log_level,
        } => {
            logging::init(log_filter(&cli.workspace, &project, cli_log_level.as_deref()));

            let cancel = CancelToken::new();
            cancel.listen_for_interrupt();

            let command = RunCommand {
                workspace: cli.workspace,
                project,
                target,
                browsers,
                environments,
                processes,
                tags,
                report,
                report_folder,
                report_name,
                timestamp,
            };
            match commands::run_run(&command, cancel) {
                Ok(true) => {}
                Ok(false) => std::process::exit(1),
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Report {
            project,
            execution,
            timestamp,
        } => {
            logging::init("warn");
            match commands::run_report(&cli.workspace, &project, &execution, &timestamp) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}
