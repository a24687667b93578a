use log::{error, info, warn};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use warp::{self, Filter};

use keyclash::config::ServerConfig;
use keyclash::constants::WS_PATH;
use keyclash::core::server::{ServerManager, SharedServerManager};
use keyclash::handlers::auth::extract_token_comprehensive;
use keyclash::handlers::websocket::handle_ws_client;
use keyclash::security_logger::init_security_logger;

#[tokio::main]
async fn main() {
    // Load .env before the logger so RUST_LOG from the file is honored
    let dotenv_result = dotenvy::dotenv();

    // Initialize logging
    env_logger::init();

    match dotenv_result {
        Ok(path) => info!("Environment variables loaded from {}", path.display()),
        Err(e) => warn!("No .env file loaded: {}", e),
    };

    init_security_logger();

    // Load config from the environment; a bad or missing secret in
    // production must stop the process here, not at request time
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Configuration: host={}, port={}, development_mode={}",
        config.host, config.port, config.development_mode
    );

    let host = config.host.clone();
    let port = config.port;

    // Create the server manager and start its background sweeps
    let server: SharedServerManager = Arc::new(ServerManager::new(config));
    let _maintenance = server.start_maintenance_tasks();

    // Create WebSocket route
    let ws_route = warp::path(WS_PATH)
        .and(warp::ws())
        .and(warp::addr::remote())
        .and(warp::header::headers_cloned())
        .and(with_server(server.clone()))
        .map(
            |ws: warp::ws::Ws,
             addr: Option<SocketAddr>,
             headers: warp::hyper::HeaderMap,
             server: SharedServerManager| {
                info!("New websocket connection");
                let token = extract_token_comprehensive(&headers);
                ws.on_upgrade(move |socket| handle_ws_client(socket, addr, token, server))
            },
        );

    // Create health check route
    let health_route = warp::path("health").map(|| "OK");

    // Combine routes
    let routes = ws_route.or(health_route);

    // Build the server address
    let addr: SocketAddr = match format!("{}:{}", host, port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to parse server address: {}", e);
            std::process::exit(1);
        }
    };

    // Start the server
    info!("Starting keyclash server on {}", addr);

    warp::serve(routes).run(addr).await;
}

// Helper function to include the server manager in request handling
fn with_server(
    server: SharedServerManager,
) -> impl Filter<Extract = (SharedServerManager,), Error = Infallible> + Clone {
    warp::any().map(move || server.clone())
}
