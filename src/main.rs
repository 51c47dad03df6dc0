use anyhow::Result;
use clap::Parser;

use roh_pipeline::api::ApiServer;
use roh_pipeline::cli::{self, Cli};
use roh_pipeline::tracing::init_tracing;
use roh_pipeline::util::env::{env_opt, init_env};

#[tokio::main]
async fn main() -> Result<()> {
    init_env();
    init_tracing("info,actix_web=warn")?;

    // SERVE_AS=http turns the binary into the request-driven entry point;
    // anything else runs one task and exits.
    if env_opt("SERVE_AS").as_deref() == Some("http") {
        return ApiServer::from_env()?.run().await;
    }
    cli::run(Cli::parse()).await
}
