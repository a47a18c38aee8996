//! gzecho server binary.

use gzecho::{presentation, Config, Server};
use tracing::dispatcher::{self, Dispatch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Build the log dispatcher handed to the server
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    let dispatch = Dispatch::new(subscriber);

    dispatcher::with_default(&dispatch, || {
        if config.loopback_fallback {
            warn!("Could not resolve local host name, binding to loopback");
        }
        info!(
            host = %config.server.host,
            port = config.server.port,
            buffer_size = config.server.buffer_size,
            stop_word = %config.server.stop_word,
            codec = ?config.presentation.codec,
            encoding = %config.presentation.encoding,
            compression_level = config.presentation.compression_level,
            max_decoded_size = config.presentation.max_decoded_size,
            "Starting gzecho server"
        );
    });

    let presenter = presentation::from_config(&config.presentation);
    let mut server = Server::new(config.server, presenter)?.with_dispatch(dispatch);
    server.start()?;
    Ok(())
}
