use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use doorward_core::envelope::generate_secret;
use doorward_core::{Action, CommandKey, CommandPayload};
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "doorward", about = "doorward door controller CLI")]
struct Cli {
    /// Base URL of the device's HTTP surface
    #[arg(long, env = "DOORWARD_DEVICE_URL", default_value = "http://127.0.0.1:5000", global = true)]
    device: String,

    /// Shared door secret used to seal remote commands
    #[arg(long, env = "DOORWARD_DOOR_SECRET", hide_env_values = true, global = true)]
    secret: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new shared door secret
    Keygen,
    /// Lock the door
    Lock,
    /// Unlock the door
    Unlock,
    /// Ring the owner through the device
    Call,
    /// End the active call
    Hangup,
    /// Show device status
    Status,
    /// Reload the watchlist gallery from the backend
    RefreshGallery,
}

/// Seal `action` stamped with the current time.
fn seal(secret: Option<&str>, action: Action) -> Result<String> {
    let Some(secret) = secret else {
        bail!("a door secret is required (--secret or DOORWARD_DOOR_SECRET)");
    };
    let payload = CommandPayload {
        action,
        timestamp: chrono::Utc::now().timestamp(),
    };
    CommandKey::from_secret(secret)
        .seal(&payload)
        .context("failed to seal command")
}

fn endpoint(device: &str, path: &str) -> String {
    format!("{}{}", device.trim_end_matches('/'), path)
}

async fn read_reply(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    if !status.is_success() {
        let reason = body["error"].as_str().unwrap_or("no details");
        bail!("device answered {status}: {reason}");
    }
    Ok(body)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;
    let device = cli.device.as_str();

    match cli.command {
        Commands::Keygen => {
            println!("{}", generate_secret());
        }
        Commands::Lock | Commands::Unlock | Commands::Call => {
            let action = match cli.command {
                Commands::Lock => Action::Lock,
                Commands::Unlock => Action::Unlock,
                _ => Action::Call,
            };
            let data = seal(cli.secret.as_deref(), action)?;
            tracing::debug!(%action, "sending sealed command");
            let response = client
                .post(endpoint(device, "/api/door/control"))
                .json(&json!({ "data": data }))
                .send()
                .await
                .with_context(|| format!("device {device} unreachable"))?;
            let reply = read_reply(response).await?;
            println!("{}", reply["status"].as_str().unwrap_or("ok"));
        }
        Commands::Hangup => {
            let response = client
                .post(endpoint(device, "/api/call/hangup"))
                .send()
                .await
                .with_context(|| format!("device {device} unreachable"))?;
            read_reply(response).await?;
            println!("call ended");
        }
        Commands::Status => {
            let response = client
                .get(endpoint(device, "/api/status"))
                .send()
                .await
                .with_context(|| format!("device {device} unreachable"))?;
            let status = read_reply(response).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::RefreshGallery => {
            let response = client
                .post(endpoint(device, "/api/gallery/refresh"))
                .send()
                .await
                .with_context(|| format!("device {device} unreachable"))?;
            let reply = read_reply(response).await?;
            println!("gallery loaded: {} entries", reply["entries"]);
        }
    }

    Ok(())
}
