//! Binary entry point: parse arguments, initialize logging, run the
//! pipeline, and map any fatal error to a non-zero exit status.

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rfm_segments::{pipeline, Args};

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = args.to_config();
    match pipeline::run(&config) {
        Ok(report) => {
            info!(
                customers = report.customers_total,
                retained = report.customers_retained,
                clusters = report.clusters,
                "customer segmentation complete"
            );
            for path in &report.artifacts {
                info!(path = %path.display(), "artifact written");
            }
        }
        Err(err) => {
            error!("segmentation run failed: {err}");
            std::process::exit(1);
        }
    }
}

/// `RUST_LOG` wins when set; otherwise `--verbose` lowers the level.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
