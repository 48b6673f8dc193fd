//! `corpus-dl` binary
//!
//! Loads configuration, runs the pipeline once and reports the outcome. Log
//! verbosity is controlled with `RUST_LOG` (default `corpus_dl=info`).

use corpus_dl::{Config, Event, Pipeline, ToExitCode, run_with_shutdown};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("corpus_dl=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match Config::load().and_then(Pipeline::new) {
        Ok(pipeline) => {
            let mut events = pipeline.subscribe();
            tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    print_progress(&event);
                }
            });
            run_with_shutdown(&pipeline).await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(report) => {
            println!(
                "Done: {} records written to {}",
                report.stats.written,
                report.table_path.display()
            );
        }
        Err(e) => {
            match e.stage() {
                Some(stage) => eprintln!("error in {} stage: {}", stage, e),
                None => eprintln!("error: {}", e),
            }
            std::process::exit(e.exit_code());
        }
    }
}

fn print_progress(event: &Event) {
    match event {
        Event::FetchProgress {
            bytes,
            total: Some(total),
        } if *total > 0 => {
            eprintln!(
                "fetch: {} / {} bytes ({:.1}%)",
                bytes,
                total,
                *bytes as f64 * 100.0 / *total as f64
            );
        }
        Event::FetchProgress { bytes, .. } => eprintln!("fetch: {} bytes", bytes),
        Event::DecompressProgress { bytes } => eprintln!("decompress: {} bytes", bytes),
        Event::TransformProgress { lines, written } => {
            eprintln!("transform: {} lines read, {} kept", lines, written)
        }
        _ => {}
    }
}
