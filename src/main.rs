use gpsrelay::app;
use gpsrelay::config::load_config;
use gpsrelay::utils::logging;
use tracing::error;

#[tokio::main]
async fn main() {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    logging::init(&config.log.level);

    if let Err(e) = app::run(config).await {
        error!("Relay failed: {e}");
        std::process::exit(1);
    }
}
