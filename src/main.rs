//! CLI entry point for the mirror tool.

use std::process::ExitCode;

mod app;
mod cli;

#[tokio::main]
async fn main() -> ExitCode {
    match app::runtime::run_mirror().await {
        Ok(exit) => exit.into(),
        Err(e) => {
            eprintln!("Error: {e:#}");
            app::exit_handler::ProcessExit::Failure.into()
        }
    }
}
