mod config;
mod distance;
mod error;
mod metadata;
mod normalize;
mod pipeline;
mod plate_format;
mod recognition;
mod server;
mod staging;
#[cfg(test)]
mod test_support;
mod tracker;
mod types;
mod upload;
mod websocket;

use config::Config;
use env_logger::Env;
use log::{error, info};

#[macro_use]
extern crate failure;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    info!("Starting plate-distance");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let server_task = tokio::spawn(server::run(config));
    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server failed: {}", e),
                Err(e) => error!("Server task failed: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
    }
    info!("Exiting main");
}
