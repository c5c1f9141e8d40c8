//! Interactive chat over ModelSocket.
//!
//! Reads user messages from stdin and streams model responses back.
//! Configure with `MODELSOCKET_URL`, `MODELSOCKET_API_KEY`, and
//! `MODELSOCKET_MODEL`.

use std::env;

use anyhow::{Context, Result};
use modelsocket::{AppendOptions, Client, ClientConfig, GenOptions, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let url = env::var("MODELSOCKET_URL")
        .unwrap_or_else(|_| "wss://models.mixlayer.ai/ws".to_string());
    let api_key = env::var("MODELSOCKET_API_KEY")
        .context("MODELSOCKET_API_KEY environment variable required")?;
    let model = env::var("MODELSOCKET_MODEL")
        .unwrap_or_else(|_| "meta/llama3.1-8b-instruct-free".to_string());

    println!("Connecting to {url}...");
    let client = Client::connect(&url, Some(&api_key), ClientConfig::default()).await?;

    println!("Opening sequence with model {model}...");
    let seq = client.open(&model, OpenOptions::default()).await?;

    println!("Connected! Type your messages (Ctrl+D to exit)");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"You: ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let message = line.trim();
        if message.is_empty() {
            continue;
        }

        seq.append(message, AppendOptions::user()).await?;

        stdout.write_all(b"Model: ").await?;
        stdout.flush().await?;

        let mut stream = seq.generate(GenOptions::assistant()).await?;
        while let Some(chunk) = stream.next().await? {
            if !chunk.hidden {
                stdout.write_all(chunk.text.as_bytes()).await?;
                stdout.flush().await?;
            }
        }
        stdout.write_all(b"\n\n").await?;
    }

    seq.close().await?;
    client.close().await?;
    Ok(())
}
