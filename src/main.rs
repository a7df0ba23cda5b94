mod alpr;
mod config;
mod error;
mod fetch;
mod intake;
mod scratch;
mod select;
mod server;
mod types;

use crate::alpr::Alpr;
use crate::config::Config;
use crate::server::Context;
use env_logger::Env;
use log::{error, info};
use std::process;
use std::sync::Arc;

#[macro_use]
extern crate failure;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    info!("Starting plate-reader");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            process::exit(1);
        }
    };
    info!(
        "Using {} (default region {}, timeout {:?}, scratch dir {:?})",
        config.alpr_bin, config.default_region, config.timeout, config.scratch_dir
    );

    let recognizer = Arc::new(Alpr::new(&config));
    server::run(Context::new(config, recognizer)).await;
    info!("Exiting main");
}
