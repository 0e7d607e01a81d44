//! Chat Client - Entry Point
//!
//! Connects to a chat server, registers a username and exchanges messages
//! from stdin. Type `/exit` to leave.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin chat_client -- --address 127.0.0.1 --port 1234
//! cargo run --bin chat_client -- -a 127.0.0.1 -p 1234
//! ```

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use tcp_chat::client::{connect, run_session, ClientConfig};
use tcp_chat::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "chat_client")]
#[command(about = "Terminal client for the TCP chat server", long_about = None)]
struct Args {
    /// Server address
    #[arg(short = 'a', long)]
    address: String,

    /// Server port
    #[arg(short = 'p', long)]
    port: u16,
}

#[tokio::main]
async fn main() {
    setup_logger(env!("CARGO_BIN_NAME"), "warn");

    let args = Args::parse();
    let config = ClientConfig {
        address: args.address,
        port: args.port,
    };

    let stream = match connect(&config).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!("Connection failed: {}", e);
            std::process::exit(1);
        }
    };

    let input = BufReader::new(tokio::io::stdin()).lines();
    let code = match run_session(stream, input).await {
        Ok(end) => {
            tracing::debug!("Session ended: {:?}", end);
            0
        }
        Err(e) => {
            tracing::error!("Client error: {}", e);
            1
        }
    };

    // A pending stdin read cannot be cancelled, so exit instead of
    // waiting for the runtime to shut down.
    std::process::exit(code);
}
