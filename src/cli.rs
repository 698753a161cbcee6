//! Command-line client for a running FeedForge server.
//!
//! Talks to the HTTP bridge and, for long-running collection tasks, follows
//! progress by polling the status endpoint at a fixed interval.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use feedforge::error::{FeedForgeError, ForgeResult};
use feedforge::task::{StatusPoller, StatusSource, TaskStatus};

#[derive(Parser)]
#[command(name = "feedforge-cli", version, about = "FeedForge command-line client")]
struct Cli {
    /// Base url of the FeedForge server
    #[arg(long, default_value = "http://127.0.0.1:8090")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start collecting one account group and follow its progress
    Collect {
        /// Account type to collect
        type_name: String,
        /// Limit how many of the group's accounts take part (0 = all)
        #[arg(long, default_value_t = 0)]
        count: usize,
        /// Only keep articles published at or after this unix timestamp
        #[arg(long)]
        since: Option<i64>,
        /// Only keep articles published at or before this unix timestamp
        #[arg(long)]
        until: Option<i64>,
        /// Start the task and exit without following progress
        #[arg(long)]
        detach: bool,
    },
    /// Show the current task status
    Status {
        /// Keep polling until the task finishes
        #[arg(long)]
        follow: bool,
    },
    /// Request a stop of the running task
    Stop,
    /// Import articles from a file of urls, one per line
    Import { file: PathBuf },
    /// Export all article metadata
    Export {
        /// Output format: csv or json
        #[arg(long, default_value = "csv")]
        format: String,
        /// Destination file path on the server host
        output: String,
    },
}

/// Status source backed by the server's status endpoint
struct HttpStatusSource {
    http: reqwest::Client,
    url: String,
}

impl HttpStatusSource {
    fn new(server: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: format!("{}/api/v1/collect/status", server.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn fetch(&self) -> ForgeResult<TaskStatus> {
        let response = self.http.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedForgeError::HttpRequest {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }
        Ok(response.json().await?)
    }
}

fn print_status(status: &TaskStatus) {
    println!(
        "[{}] {}% — {}/{} units ({} ok, {} failed), {} articles",
        status.state,
        status.progress,
        status.completed,
        status.total,
        status.success,
        status.failed,
        status.total_articles
    );
    if let Some(entry) = status.logs.last() {
        println!("  {} {:?}: {}", entry.time, entry.level, entry.message);
    }
}

async fn follow_task(server: &str) -> Result<()> {
    let poller = StatusPoller::new(HttpStatusSource::new(server));
    let final_status = poller.run(print_status).await;
    match final_status {
        Some(_) => Ok(()),
        None => Err(anyhow!("no status received from server")),
    }
}

async fn post_json(
    server: &str,
    path: &str,
    body: serde_json::Value,
) -> Result<serde_json::Value> {
    let url = format!("{}/api/v1{}", server.trim_end_matches('/'), path);
    let response = reqwest::Client::new().post(&url).json(&body).send().await?;
    let value: serde_json::Value = response.json().await?;
    if value.get("success").and_then(|v| v.as_bool()) == Some(false) {
        let message = value
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("request failed");
        return Err(anyhow!("{}", message));
    }
    Ok(value)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Collect {
            type_name,
            count,
            since,
            until,
            detach,
        } => {
            post_json(
                &cli.server,
                "/collect/start",
                serde_json::json!({
                    "type_name": &type_name,
                    "count": count,
                    "since": since,
                    "until": until,
                }),
            )
            .await?;
            println!("Collection started for type '{}'", type_name);
            if !detach {
                follow_task(&cli.server).await?;
            }
        }
        Command::Status { follow } => {
            if follow {
                follow_task(&cli.server).await?;
            } else {
                let mut poller = StatusPoller::new(HttpStatusSource::new(&cli.server));
                match poller.poll_once().await {
                    Some(status) => print_status(status),
                    None => return Err(anyhow!("server unreachable")),
                }
            }
        }
        Command::Stop => {
            post_json(&cli.server, "/collect/stop", serde_json::json!({})).await?;
            println!("Stop requested");
        }
        Command::Import { file } => {
            let urls = tokio::fs::read_to_string(&file).await?;
            let result = post_json(
                &cli.server,
                "/articles/import",
                serde_json::json!({ "urls": urls }),
            )
            .await?;
            println!(
                "Imported: {} added, {} skipped, {} invalid",
                result["added"], result["skipped"], result["invalid"]
            );
        }
        Command::Export { format, output } => {
            let result = post_json(
                &cli.server,
                "/articles/export",
                serde_json::json!({ "format": format, "output_path": output }),
            )
            .await?;
            println!("Exported {} records to {}", result["records"], result["path"]);
        }
    }

    Ok(())
}
