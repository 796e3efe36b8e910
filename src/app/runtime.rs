use std::io;

use anyhow::{Context, Result};
use clap::Parser;
use mirror_core::fetch::PageClient;
use mirror_core::orchestrator::{MirrorError, Orchestrator};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app::exit_handler::{self, ProcessExit};
use crate::app::terminal;
use crate::cli::Args;

pub(crate) async fn run_mirror() -> Result<ProcessExit> {
    // Parsed before tracing so --help prints without log noise.
    let args = Args::parse();
    terminal::init_tracing(args.default_log_level());
    debug!(?args, "CLI arguments parsed");

    let config = match args.to_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return Ok(ProcessExit::Failure);
        }
    };
    info!(
        root = %config.output_root().display(),
        seed = %config.seed(),
        "Mirror starting"
    );

    let client = PageClient::new().context("failed to build HTTP client")?;
    let orchestrator = Orchestrator::new(config, client);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing in-flight work");
            on_signal.cancel();
        }
    });

    let summary = match orchestrator.run(cancel).await {
        Ok(summary) => summary,
        Err(e @ MirrorError::Input(_)) => {
            error!(error = %e, "cannot start mirror");
            return Ok(ProcessExit::Failure);
        }
        Err(e @ MirrorError::Rehydrate(_)) => {
            error!(error = %e, "mirror aborted");
            return Ok(ProcessExit::Failure);
        }
    };

    if !args.quiet {
        summary
            .write_report(&mut io::stderr().lock())
            .context("failed to write run summary")?;
    }
    Ok(exit_handler::determine_exit_outcome(&summary))
}
