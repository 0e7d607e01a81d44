//! Chat Server - Entry Point
//!
//! Binds the listener and runs the accept loop until Ctrl+C.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin chat_server
//! cargo run --bin chat_server -- --host 0.0.0.0 --port 4000
//! ```

use clap::Parser;
use tracing::{error, info};

use tcp_chat::logger::setup_logger;
use tcp_chat::server::{ChatServer, ServerConfig, DEFAULT_HOST, DEFAULT_PORT};

#[derive(Parser, Debug)]
#[command(name = "chat_server")]
#[command(about = "Multi-client TCP chat server", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() {
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();
    let config = ServerConfig::new(args.host, args.port);

    let server = match ChatServer::bind(&config).await {
        Ok(server) => server,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let stop = server.shutdown_token();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Ctrl+C received");
        stop.cancel();
    });

    if let Err(e) = server.run().await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
