use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "presence", about = "Presence attendance CLI")]
struct Cli {
    /// Base URL of the presenced daemon.
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll an identity from a photo
    Enroll {
        /// Display name for the identity
        #[arg(short, long)]
        name: String,
        /// Path to the photo file
        photo: PathBuf,
    },
    /// Identify a face and record attendance
    Identify {
        /// Path to the photo file
        photo: PathBuf,
    },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity
    Remove {
        /// Identity id to remove
        id: String,
    },
    /// Show daemon status
    Status,
}

/// JSON envelope returned by attendance and API endpoints.
#[derive(Deserialize)]
struct Envelope {
    status: bool,
    message: String,
    score: Option<f32>,
}

#[derive(Deserialize)]
struct IdentityView {
    id: String,
    name: String,
    model_version: String,
    created_at: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Enroll { name, photo } => {
            let bytes = std::fs::read(&photo)
                .with_context(|| format!("reading {}", photo.display()))?;
            let filename = photo
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "photo.jpg".to_string());

            let form = reqwest::multipart::Form::new()
                .text("name", name.clone())
                .part(
                    "photo",
                    reqwest::multipart::Part::bytes(bytes).file_name(filename),
                );

            let resp = client
                .post(format!("{}/admin/register", cli.server))
                .multipart(form)
                .send()
                .await
                .context("sending enrollment request")?;

            if !resp.status().is_success() {
                bail!("enrollment failed: HTTP {}", resp.status());
            }
            // The enrollment endpoint renders HTML; a no-face outcome is
            // reported inside a 200 page.
            let body = resp.text().await?;
            if body.contains("Enrollment failed") {
                bail!("enrollment failed: no face detected in {}", photo.display());
            }
            println!("Enrolled: {name}");
        }
        Commands::Identify { photo } => {
            let bytes = std::fs::read(&photo)
                .with_context(|| format!("reading {}", photo.display()))?;

            let form = reqwest::multipart::Form::new().part(
                "photo",
                reqwest::multipart::Part::bytes(bytes).file_name("photo.jpg"),
            );

            let envelope: Envelope = client
                .post(format!("{}/attendance/upload", cli.server))
                .multipart(form)
                .send()
                .await
                .context("sending identify request")?
                .json()
                .await
                .context("decoding identify response")?;

            match envelope.score {
                Some(score) => println!("{} (score {score:.3})", envelope.message),
                None => println!("{}", envelope.message),
            }
            if !envelope.status {
                std::process::exit(1);
            }
        }
        Commands::List => {
            let identities: Vec<IdentityView> = client
                .get(format!("{}/api/identities", cli.server))
                .send()
                .await
                .context("listing identities")?
                .json()
                .await
                .context("decoding identity list")?;

            if identities.is_empty() {
                println!("No identities enrolled");
            }
            for identity in identities {
                println!(
                    "{}  {}  model={}  enrolled={}",
                    identity.id, identity.name, identity.model_version, identity.created_at
                );
            }
        }
        Commands::Remove { id } => {
            let envelope: Envelope = client
                .delete(format!("{}/api/identities/{id}", cli.server))
                .send()
                .await
                .context("removing identity")?
                .json()
                .await
                .context("decoding remove response")?;

            println!("{}", envelope.message);
            if !envelope.status {
                std::process::exit(1);
            }
        }
        Commands::Status => {
            let status: serde_json::Value = client
                .get(format!("{}/api/status", cli.server))
                .send()
                .await
                .context("querying status")?
                .json()
                .await
                .context("decoding status")?;

            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}
