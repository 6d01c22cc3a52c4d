//! Process entrypoint.
//!
//! Reads configuration, initializes logging, builds the Controller façade
//! as a single owned value, serves the HTTP surface over it, and shuts
//! down cleanly on Ctrl-C.

use std::sync::Arc;

use log::info;
use servo_bus_controller::config::Config;
use servo_bus_controller::controller::Controller;
use servo_bus_controller::http;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env();
    info!(
        "starting servo-bus-controller (bind={}, default_baud={}, supervisor_interval={:?})",
        config.bind_addr, config.default_baud, config.supervisor_interval
    );

    let controller = Arc::new(Controller::new(config.supervisor_interval));
    let app = http::router(controller.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    controller.disconnect();
    info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("failed to install Ctrl-C handler");
}
