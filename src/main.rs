//! `gauntlet` binary: serves the playground API.
//!
//! Run with:
//!   RUST_LOG=gauntlet=debug cargo run
//!
//! Try:
//!   curl localhost:3000/api/middlewares
//!   curl -X POST localhost:3000/api/run \
//!        -H 'content-type: application/json' \
//!        -d '{"chain":[{"key":"logger"},{"key":"respond","options":{"status":201,"body":{"ok":true}}}]}'

use gauntlet::{App, Config, Server};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), gauntlet::Error> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    Server::bind(config.addr).serve(App::new(config)).await
}
