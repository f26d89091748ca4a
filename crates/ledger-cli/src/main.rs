use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::{Client, Response};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ledger-cli")]
#[command(about = "CLI client for the ledger node")]
struct Cli {
    /// Node base URL
    #[arg(long, global = true, env = "LEDGER_NODE", default_value = "http://127.0.0.1:8080")]
    node: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a transaction to the pending pool
    Submit {
        /// Transaction payload
        data: String,
    },
    /// Mine the pending pool into a new block
    Mine {
        /// Leading zero hex characters; the node's default if omitted
        #[arg(long)]
        difficulty: Option<u32>,
        /// Give up after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// List committed blocks, oldest first
    Blocks,
    /// List pending transactions
    Pending,
    /// Find committed transactions containing a term (case-insensitive)
    Search { query: String },
    /// Chain name, height and pool size
    Info,
}

#[derive(Serialize)]
struct TxOut<'a> {
    data: &'a str,
}

#[derive(Serialize)]
struct MineOut {
    #[serde(skip_serializing_if = "Option::is_none")]
    difficulty: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let cli = Cli::parse();
    let node = cli.node.trim_end_matches('/');
    let client = Client::new();
    debug!(node, command = ?cli.cmd, "sending request");

    let res = match &cli.cmd {
        Command::Submit { data } => {
            client
                .post(format!("{node}/tx"))
                .json(&TxOut { data })
                .send()
                .await
        }
        Command::Mine {
            difficulty,
            timeout_ms,
        } => {
            client
                .post(format!("{node}/mine"))
                .json(&MineOut {
                    difficulty: *difficulty,
                    timeout_ms: *timeout_ms,
                })
                .send()
                .await
        }
        Command::Blocks => client.get(format!("{node}/blocks")).send().await,
        Command::Pending => client.get(format!("{node}/pending")).send().await,
        Command::Search { query } => {
            client
                .get(format!("{node}/search"))
                .query(&[("q", query)])
                .send()
                .await
        }
        Command::Info => client.get(format!("{node}/info")).send().await,
    }
    .with_context(|| format!("request to {node} failed"))?;

    print_response(res).await
}

async fn print_response(res: Response) -> Result<()> {
    let status = res.status();
    let body = res.text().await?;
    println!("status: {}", status);
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{body}"),
    }
    if !status.is_success() {
        anyhow::bail!("node returned {status}");
    }
    Ok(())
}
