mod config;
mod controller;
mod datastore;
mod log;
mod model;

use anyhow::Context;
use dotenv::dotenv;
use std::env;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tracing::{event, info, Level};
use tracing_subscriber::EnvFilter;

use config::Config;

fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = match env::var("TASKBOARD_CONFIG") {
        Ok(path) => {
            Config::from_file(&path).with_context(|| format!("loading config from {}", path))?
        }
        Err(_) => Config::default(),
    };
    let env_filter = EnvFilter::try_from_env("TASKBOARD_LOG");
    log::setup(env_filter, config.log.as_ref())?;

    event!(Level::INFO, "Starting TaskBoard: {}", env!("FULL_VERSION"));

    let database = Arc::new(datastore::connect(&config.storage.url)?);
    let controller = controller::BoardController::start(database, &config)?;

    let term = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&term))?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&term))?;

    while !term.load(Ordering::Acquire) {
        std::thread::park_timeout(Duration::from_millis(250));
    }
    info!("Stopping TaskBoard...");
    controller.stop()?;
    Ok(())
}

#[cfg(all(test, feature = "e2e"))]
mod e2e_tests;
