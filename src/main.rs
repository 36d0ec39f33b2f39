//! Shim binary that calls into the `gcsproxy_server` library's `inner_main`.
use clap::Parser as _;
use eyre::Result;

use gcsproxy_server::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Delegate to library entrypoint
    gcsproxy_server::inner_main(Cli::parse()).await
}
