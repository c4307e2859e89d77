/**
 * Entry point of the TURN amplification measurement tool: loads settings, sets up logging,
 * runs the measurement and prints the report.
 */
use clap::Parser;
use slog::{crit, info, Logger};
use std::sync::Arc;

use crate::config::{loglevel_type, Overrides, Settings};
use crate::measure::SetupError;

mod config;
mod logging;
mod measure;
mod report;
mod stun;
mod utils;

/**
 * Represents the context shared by the measurement.
 *
 * Fields:
 * - `config`: The effective settings (configuration plus command line).
 * - `logger`: The root logger instance.
 */
#[derive(Debug)]
pub(crate) struct Context {
    pub(crate) config: Settings,
    pub(crate) logger: Logger,
}

/// Measure how much a TURN server amplifies unauthenticated Allocate requests
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TURN server address (host:port)
    #[arg(short, long)]
    server: Option<String>,

    /// Number of requests to send
    #[arg(short, long)]
    count: Option<u32>,

    /// How long to wait for each response, in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Pause between requests, in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error, critical)
    #[arg(long, value_parser = parse_log_level)]
    log_level: Option<slog::Level>,
}

fn parse_log_level(value: &str) -> Result<slog::Level, String> {
    loglevel_type::parse(value).ok_or_else(|| format!("unknown log level '{}'", value))
}

impl From<Args> for Overrides {
    fn from(args: Args) -> Self {
        Overrides {
            server_address: args.server,
            request_count: args.count,
            read_timeout_ms: args.timeout_ms,
            interval_ms: args.interval_ms,
            log_level: args.log_level,
        }
    }
}

/**
 * Print the banner, measure, print the report
 */
async fn run(context: &Arc<Context>) -> Result<(), SetupError> {
    let cfg = &context.config;

    println!("TURN Amplification Factor Measurement Tool");
    println!("==========================================");
    println!("Target server: {}", cfg.server_address);
    println!("Request count: {}", cfg.request_count);

    info!(
        context.logger,
        "Environment {}, read timeout {:?}, interval {:?}",
        cfg.environment.as_str(),
        cfg.read_timeout(),
        cfg.interval()
    );
    let results = measure::measure(context, &cfg.server_address, cfg.request_count).await?;

    print!("{}", report::render(&results, cfg.request_count));
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let settings = match Settings::new() {
        Ok(settings) => settings.with_overrides(args.into()),
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(2);
        }
    };

    let (logger, guard) = logging::init_logger(&settings);
    let context = Arc::new(Context {
        config: settings,
        logger,
    });

    let outcome = run(&context).await;
    if let Err(e) = &outcome {
        crit!(
            context.logger,
            "Failed to measure amplification factor: {}",
            e
        );
    }

    // flush pending log records before exiting
    drop(context);
    drop(guard);

    if outcome.is_err() {
        std::process::exit(1);
    }
}
