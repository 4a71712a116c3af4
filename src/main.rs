//! Rex - a unit-based automation and workflow runner.
//!
//! An operator supplies a configuration, a suite of unit definitions and a
//! plan. Rex binds plan tasks to their units and executes them in order,
//! honoring dependencies, identity switching, shell wrapping, environment
//! sourcing, PTY allocation and the rectify/required failure policy.

mod config;
mod exec;
mod plan;
mod platform;
mod suite;

#[cfg(test)]
mod tests;

use crate::config::Config;
use crate::plan::Plan;
use crate::suite::Suite;

use clap::Parser;
use log::{error, info};

use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "rex", disable_help_flag = true, disable_version_flag = true)]
struct Cli {
    /// This usage screen
    #[arg(short = 'h', long = "help")]
    help: bool,

    /// Sets verbose output. Generally more than you want to see.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Prints version information and exits
    #[arg(short = 'i', long = "version_info")]
    version_info: bool,

    /// Path to the configuration file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Path to the plan file to execute
    #[arg(short = 'p', long = "plan")]
    plan: Option<PathBuf>,
}

fn print_usage() {
    eprintln!();
    eprintln!("Usage:");
    eprintln!(
        "\trex [ -h | --help ] [ -v | --verbose ] [ -i | --version_info ] ( -c | --config ) CONFIG_PATH ( -p | --plan ) PLAN_PATH"
    );
    eprintln!();
    eprintln!("Optional arguments:");
    eprintln!("\t-h | --help\n\t\tThis usage screen.  Mutually exclusive to all other options.");
    eprintln!("\t-v | --verbose\n\t\tSets verbose output.  Generally more than you want to see.");
    eprintln!("\t-i | --version_info\n\t\tPrints version information and exits.");
    eprintln!();
    eprintln!("Required arguments:");
    eprintln!("\t-c | --config\n\t\tSupply the path for the configuration file.");
    eprintln!("\t-p | --plan\n\t\tSupply the path for the plan file to execute.");
    eprintln!();
}

/// Console output split by severity (warn and up on stderr, the rest on
/// stdout), everything mirrored to the local syslog facility.
fn setup_logging(verbose: bool) -> Result<(), fern::InitError> {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let console = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}]\t[{}]\t[{}]\t{}",
                chrono::Local::now().format("%Y-%m-%d_%H:%M:%S"),
                record.target(),
                record.level(),
                message
            ))
        })
        .chain(
            fern::Dispatch::new()
                .filter(|metadata| metadata.level() >= log::Level::Info)
                .chain(std::io::stdout()),
        )
        .chain(
            fern::Dispatch::new()
                .filter(|metadata| metadata.level() <= log::Level::Warn)
                .chain(std::io::stderr()),
        );

    let mut dispatch = fern::Dispatch::new().level(level).chain(console);

    let syslog_formatter = syslog::Formatter3164 {
        facility: syslog::Facility::LOG_USER,
        hostname: None,
        process: "rex".to_string(),
        pid: std::process::id(),
    };
    match syslog::unix(syslog_formatter) {
        Ok(writer) => {
            dispatch = dispatch.chain(writer);
        }
        Err(e) => {
            eprintln!("rex: syslog unavailable, console logging only: {e}");
        }
    }

    dispatch.apply()?;
    Ok(())
}

fn run(config_path: &Path, plan_path: &Path) -> i32 {
    info!("* Initialising Logging...");

    let configuration = match Config::load(config_path) {
        Ok(configuration) => configuration,
        Err(e) => {
            error!("{e}");
            return 1;
        }
    };

    // A suite contains the definitions of all actionable units; a plan
    // selects which of them to execute, and in what order.
    info!("* Loading all actionable Units into Suite...");
    let available_definitions = match Suite::load(configuration.units_path()) {
        Ok(suite) => suite,
        Err(e) => {
            error!("{e}");
            return 1;
        }
    };
    info!("* {} actionable unit(s) available.", available_definitions.len());

    info!("* Loading Plan...");
    let mut plan = match Plan::load(plan_path) {
        Ok(plan) => plan,
        Err(e) => {
            error!("{e}");
            return 1;
        }
    };

    info!("* Loading planned Tasks from Suite to Plan.");
    if let Err(e) = plan.bind_definitions(&available_definitions, &configuration) {
        error!("{e}");
        return 1;
    }

    info!("* Ready to execute all actionable Tasks in Plan.");
    match plan.execute(&configuration) {
        Ok(()) => 0,
        Err(e) => {
            error!("{e}");
            1
        }
    }
}

fn main() {
    let cli = Cli::parse();

    if cli.version_info {
        println!("rex {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    if cli.help || cli.config.is_none() || cli.plan.is_none() {
        if !cli.help {
            if cli.config.is_none() {
                eprintln!("NOT SUPPLIED: CONFIG_PATH");
            }
            if cli.plan.is_none() {
                eprintln!("NOT SUPPLIED: PLAN_PATH");
            }
        }
        print_usage();
        return;
    }

    if let Err(e) = setup_logging(cli.verbose) {
        eprintln!("rex: could not initialise logging: {e}");
        std::process::exit(1);
    }

    let config_path = cli.config.unwrap_or_default();
    let plan_path = cli.plan.unwrap_or_default();
    std::process::exit(run(&config_path, &plan_path));
}
