use redmock::{MockServer, ServiceOptions};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let options = match ServiceOptions::load() {
        Ok(options) => options,
        Err(e) => {
            eprintln!("redmock: {:#}", e);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&options.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("redmock starting with {} databases", options.databases);

    let server = match MockServer::start(&options).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start server: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {}", e);
    }

    info!("Stopping redmock on {}", server.addr());
    if let Err(e) = server.stop().await {
        error!("Server stopped with an error: {:#}", e);
    }
}
