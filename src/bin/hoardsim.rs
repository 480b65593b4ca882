//! hoardsim command-line interface
//!
//! Drives the simulated Hoard allocator by hand or from scripts:
//! - Interactive shell (malloc / free / thread / print)
//! - Script execution with per-step state output
//! - The built-in two-thread smoke scenario
//! - Configuration and statistics inspection
//!
//! # Examples
//!
//! ```bash
//! # Interactive shell with four thread heaps
//! HOARD_THREADS=4 hoardsim shell
//!
//! # Run a script and print the memory after every step
//! hoardsim run commands.txt --each
//!
//! # Effective configuration as TOML
//! hoardsim --config hoard.toml config
//! ```

use clap::{Args, Parser, Subcommand};
use hoardsim::hoard::metrics::export_metrics;
use hoardsim::hoard::script::{run_script, Command, Session, StepOutcome, PRELIM_SCENARIO};
use hoardsim::{Hoard, HoardConfig};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// hoardsim - Simulated Hoard superblock allocator
#[derive(Parser, Debug)]
#[command(name = "hoardsim")]
#[command(version = hoardsim::VERSION)]
#[command(about = "hoardsim - Simulated Hoard superblock allocator", long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(long, global = true, env = "HOARD_CONFIG")]
    config: Option<PathBuf>,

    /// Log directory path
    #[arg(long, global = true, default_value = "logs", env = "HOARD_LOG_DIR")]
    log_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn", env = "RUST_LOG")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interactive allocator shell
    Shell,

    /// Run a command script
    Run(RunArgs),

    /// Run the built-in two-thread scenario
    Scenario(OutputArgs),

    /// Print the effective configuration
    Config,

    /// Print allocator statistics, optionally after running a script
    Stats(StatsArgs),

    /// Show version
    Version,
}

/// Script arguments
#[derive(Args, Debug)]
struct RunArgs {
    /// Script file, one command per line
    script: PathBuf,

    #[command(flatten)]
    output: OutputArgs,
}

/// Output options shared by script-driven commands
#[derive(Args, Debug)]
struct OutputArgs {
    /// Print the memory after every step instead of only at the end
    #[arg(long)]
    each: bool,

    /// Print the final state dump as JSON
    #[arg(long)]
    json: bool,

    /// Bytes per line when printing memory
    #[arg(long, default_value = "64")]
    width: usize,
}

/// Statistics arguments
#[derive(Args, Debug)]
struct StatsArgs {
    /// Script to run first
    #[arg(long)]
    script: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Also print Prometheus metrics
    #[arg(long)]
    metrics: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(&cli)?;

    let config = HoardConfig::load(cli.config.as_deref())?;
    let color = !cli.no_color;

    match cli.command {
        Commands::Shell => shell_command(config, color),
        Commands::Run(args) => {
            let script = std::fs::read_to_string(&args.script)?;
            script_command(config, &script, &args.output, color)
        }
        Commands::Scenario(args) => script_command(config, PRELIM_SCENARIO, &args, color),
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Stats(args) => stats_command(config, args),
        Commands::Version => {
            println!("hoardsim {}", hoardsim::VERSION);
            Ok(())
        }
    }
}

/// Setup logging with rolling files and console output
fn setup_logging(cli: &Cli) -> anyhow::Result<()> {
    std::fs::create_dir_all(&cli.log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &cli.log_dir, "hoardsim.log");

    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::WARN);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(!cli.no_color),
        )
        .with(fmt::layer().with_writer(file_appender).with_ansi(false))
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(())
}

fn print_banner(hoard: &Hoard) {
    let config = hoard.config();
    println!("Allocator shell version {}", hoardsim::VERSION);
    println!(
        "Memory has size {}. Page size is {}. Superblock size is {}.",
        config.capacity,
        config.page_size,
        config.block_size()
    );
    println!(
        "{} thread heaps, size classes {}..={} bytes",
        hoard.threads(),
        hoard.size_classes().min_size(),
        hoard.size_classes().max_size()
    );
    println!("Type \"?\" for help, type \"quit\" to exit");
}

fn print_state(hoard: &Hoard, color: bool, width: usize) {
    let dump = hoard.dump_state();
    print!("{}", dump.render(color, width));
    let summary = dump.summary();
    println!(
        "live={} freed={} unused={} frontier={}",
        summary.live, summary.freed, summary.unused, dump.frontier
    );
}

/// Interactive shell
fn shell_command(config: HoardConfig, color: bool) -> anyhow::Result<()> {
    let hoard = Hoard::new(config)?;
    info!("Starting allocator shell");
    print_banner(&hoard);

    let mut session = Session::new(&hoard);
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("[heap {}]> ", session.heap());
        io::stdout().flush()?;

        let Some(line) = lines.next() else { break };
        let line = line?;
        if line.trim().is_empty() {
            break;
        }

        match session.execute_line(&line) {
            None => {}
            Some(StepOutcome::Quit) => break,
            Some(StepOutcome::Help) => println!("{}", Command::help()),
            Some(StepOutcome::Print) => print_state(&hoard, color, 64),
            Some(failed @ StepOutcome::Failed { .. }) => println!("{}", failed),
            Some(StepOutcome::Allocated { address, .. }) => {
                println!("{}", address);
                print_state(&hoard, color, 64);
            }
            Some(outcome @ StepOutcome::Released { .. }) => {
                println!("{}", outcome);
                print_state(&hoard, color, 64);
            }
            Some(outcome) => println!("{}", outcome),
        }
    }

    Ok(())
}

/// Run a script, printing each step
fn script_command(
    config: HoardConfig,
    script: &str,
    output: &OutputArgs,
    color: bool,
) -> anyhow::Result<()> {
    let hoard = Hoard::new(config)?;

    if output.each {
        let mut session = Session::new(&hoard);
        for line in script.lines() {
            match session.execute_line(line) {
                None => continue,
                Some(StepOutcome::Quit) => break,
                Some(outcome) => {
                    if outcome.is_failure() {
                        warn!("{}", outcome);
                    }
                    println!("{}", outcome);
                    print_state(&hoard, color, output.width);
                }
            }
        }
    } else {
        for outcome in run_script(&hoard, script) {
            println!("{}", outcome);
        }
    }

    if output.json {
        println!("{}", serde_json::to_string_pretty(&hoard.dump_state())?);
    } else if !output.each {
        print_state(&hoard, color, output.width);
    }
    println!("{}", hoard.stats());
    Ok(())
}

/// Statistics command
fn stats_command(config: HoardConfig, args: StatsArgs) -> anyhow::Result<()> {
    let hoard = Hoard::new(config)?;
    if let Some(path) = &args.script {
        let script = std::fs::read_to_string(path)?;
        let failures = run_script(&hoard, &script)
            .into_iter()
            .filter(StepOutcome::is_failure)
            .count();
        if failures > 0 {
            warn!(failures, "Script finished with failed steps");
        }
    }

    let stats = hoard.stats();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print!("{}", stats);
    }
    if args.metrics {
        print!("{}", export_metrics());
    }
    Ok(())
}
