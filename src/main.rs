use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::net::TcpListener;

use layerwiki::handlers::{handle_path, handle_root};
use layerwiki::logger::Logger;
use layerwiki::{Config, Wiki, WikiError};

#[tokio::main]
async fn main() -> Result<(), WikiError> {
    if let Err(e) = Logger::init() {
        eprintln!("Failed to install logger: {}", e);
    }

    let config = Config::from_env();
    let addr = config.socket_addr();
    let wiki = Arc::new(Wiki::load(config).await?);

    let app = Router::new()
        .route("/", get(handle_root))
        .route("/*path", get(handle_path))
        .with_state(wiki);

    log::info!("Wiki listening on http://{}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await.map_err(WikiError::from)
}
