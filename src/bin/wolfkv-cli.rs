//! wolfkv-cli - Command line client for WolfKV
//!
//! Usage:
//!   wolfkv-cli set key value   - Run a single query
//!   wolfkv-cli                 - Interactive mode, one query per line

use clap::Parser;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use wolfkv::network::NetworkClient;

/// WolfKV client
#[derive(Parser)]
#[command(name = "wolfkv-cli")]
#[command(about = "Send queries to a WolfKV node", long_about = None)]
struct Cli {
    /// Node address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:3223")]
    address: String,

    /// Request timeout in seconds
    #[arg(short, long, default_value_t = 10)]
    timeout: u64,

    /// Query to run, e.g. `get key`; omit for interactive mode
    query: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let timeout = Duration::from_secs(cli.timeout);
    let mut client = NetworkClient::new(cli.address.clone()).with_timeouts(timeout, timeout);

    if !cli.query.is_empty() {
        let query = cli.query.join(" ");
        match client.send(query.as_bytes()).await {
            Ok(response) => println!("{}", String::from_utf8_lossy(&response)),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    if let Err(e) = interactive(&mut client).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn interactive(client: &mut NetworkClient) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    println!("Connected to {} (type 'exit' to quit)", client.address());
    loop {
        stdout.write_all(b"wolfkv> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query.eq_ignore_ascii_case("exit") || query.eq_ignore_ascii_case("quit") {
            break;
        }

        match client.send(query.as_bytes()).await {
            Ok(response) => println!("{}", String::from_utf8_lossy(&response)),
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    client.close();
    Ok(())
}
