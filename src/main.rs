use std::process::ExitCode;

mod alertmanager;
mod buildinfo;
mod chat;
mod cli;
mod config;
mod delivery;
mod metrics;
mod server;

#[tokio::main]
async fn main() -> ExitCode {
    cli::run().await
}
