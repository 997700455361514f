//! Load testing tool for the knock HTTP server.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p knock-loadtest --release -- --url http://localhost:8080 --requests 500
//! cargo run -p knock-loadtest -- --concurrency 1 10 --skip-sustained
//! ```

#![allow(clippy::print_stdout)] // the report is the program's output

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use knock_loadtest::{LoadTestError, Report, burst_test, sustained_test};

/// Pause between burst runs so the server's backlog drains.
const PAUSE_BETWEEN_BURSTS: Duration = Duration::from_secs(1);

/// HTTP server load testing tool.
#[derive(Debug, Parser)]
#[command(name = "knock-loadtest", version, about)]
struct Args {
    /// Target URL.
    #[arg(long, default_value = "http://localhost:8080")]
    url: String,

    /// Total number of requests per test.
    #[arg(long, default_value_t = 1000)]
    requests: usize,

    /// Concurrency levels to test.
    #[arg(long, num_args = 1.., default_values_t = [10, 50, 100, 500])]
    concurrency: Vec<usize>,

    /// Duration for the sustained test, in seconds.
    #[arg(long, default_value_t = 5)]
    sustained_duration: u64,

    /// Skip burst tests.
    #[arg(long)]
    skip_burst: bool,

    /// Skip the sustained test.
    #[arg(long)]
    skip_sustained: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    tokio::select! {
        result = run(args) => {
            if let Err(e) = result {
                tracing::error!("load test failed: {e}");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!("\n\nTest interrupted by user");
        }
    }
}

async fn run(args: Args) -> Result<(), LoadTestError> {
    let rule = "=".repeat(70);
    println!("{rule}");
    println!("HTTP Server Load Testing");
    println!("{rule}");
    println!("Target: {}", args.url);
    println!("Total requests per test: {}", args.requests);

    if !args.skip_sustained {
        println!("\n{rule}");
        println!(
            "SUSTAINED TEST: {} requests over {} seconds",
            args.requests, args.sustained_duration
        );
        println!("{rule}");
        let (results, elapsed) = sustained_test(
            &args.url,
            args.requests,
            Duration::from_secs(args.sustained_duration),
        )
        .await?;
        println!("\n{}", Report::new("SUSTAINED LOAD", &results, elapsed));
    }

    if !args.skip_burst {
        let mut levels = args.concurrency;
        levels.sort_unstable();
        for concurrency in levels {
            println!("\n{rule}");
            println!(
                "BURST TEST: {} requests, max {concurrency} concurrent",
                args.requests
            );
            println!("{rule}");
            let (results, elapsed) = burst_test(&args.url, args.requests, concurrency).await?;
            let name = format!("BURST (concurrency={concurrency})");
            println!("\n{}", Report::new(name, &results, elapsed));
            tokio::time::sleep(PAUSE_BETWEEN_BURSTS).await;
        }
    }

    println!("\n{rule}");
    println!("All tests complete!");
    println!("{rule}");
    Ok(())
}
