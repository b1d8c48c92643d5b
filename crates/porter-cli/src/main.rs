use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "porter", about = "Porter access-control CLI")]
struct Cli {
    /// Base URL of the porterd API.
    #[arg(long, global = true, default_value = "http://127.0.0.1:8700")]
    addr: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new identity from an image file
    Enroll {
        /// Identity name (must be unique)
        name: String,
        /// Path to the image file
        image: PathBuf,
    },
    /// Submit a frame for recognition
    Capture {
        /// Path to the image file
        image: PathBuf,
    },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity
    Remove { name: String },
    /// Rename an enrolled identity
    Rename { name: String, new_name: String },
    /// Show today's attendance
    Attendance,
    /// Show recent visitor decisions
    Visitors,
    /// Send a chat message to the visitor flow
    Chat {
        message: String,
        /// Continue an existing session
        #[arg(long)]
        session: Option<String>,
    },
    /// Poll a visitor session for its outcome
    Status { session: String },
    /// Check daemon health
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let base = cli.addr.trim_end_matches('/').to_string();
    let client = reqwest::Client::new();

    let response = match cli.command {
        Commands::Enroll { name, image } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("reading {}", image.display()))?;
            client
                .post(format!("{base}/api/v1/identities/{name}"))
                .body(bytes)
                .send()
                .await?
        }
        Commands::Capture { image } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("reading {}", image.display()))?;
            client
                .post(format!("{base}/api/v1/frames"))
                .body(bytes)
                .send()
                .await?
        }
        Commands::List => client.get(format!("{base}/api/v1/identities")).send().await?,
        Commands::Remove { name } => {
            client
                .delete(format!("{base}/api/v1/identities/{name}"))
                .send()
                .await?
        }
        Commands::Rename { name, new_name } => {
            client
                .put(format!("{base}/api/v1/identities/{name}"))
                .json(&json!({ "name": new_name }))
                .send()
                .await?
        }
        Commands::Attendance => {
            client
                .get(format!("{base}/api/v1/attendance/today"))
                .send()
                .await?
        }
        Commands::Visitors => {
            client
                .get(format!("{base}/api/v1/visitors/recent"))
                .send()
                .await?
        }
        Commands::Chat { message, session } => {
            client
                .post(format!("{base}/api/v1/chat"))
                .json(&json!({ "message": message, "session_id": session }))
                .send()
                .await?
        }
        Commands::Status { session } => {
            client
                .get(format!("{base}/api/v1/chat/status"))
                .query(&[("session_id", session)])
                .send()
                .await?
        }
        Commands::Health => client.get(format!("{base}/api/v1/health")).send().await?,
    };

    print_response(response).await
}

/// Print the response body, pretty-printing JSON when possible.
async fn print_response(response: reqwest::Response) -> Result<()> {
    let status = response.status();
    let text = response.text().await?;

    if text.is_empty() {
        println!("{status}");
    } else {
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            Err(_) => println!("{text}"),
        }
    }

    if !status.is_success() {
        bail!("request failed with {status}");
    }
    Ok(())
}
