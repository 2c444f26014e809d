use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod manifest;

#[derive(Parser)]
#[command(
    name = "presence-models",
    about = "Manage the ONNX inference artifacts used by presenced"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the pinned artifacts
    List,
    /// Verify the digests of artifacts present in a model directory
    Verify {
        /// Model directory (defaults to the daemon's model dir)
        dir: Option<PathBuf>,
    },
    /// Install an artifact into a model directory after digest verification
    Install {
        /// Path to the artifact file
        file: PathBuf,
        /// Target model directory
        dir: PathBuf,
    },
    /// Load an ONNX model and print its input/output tensors
    Inspect {
        /// Path to the ONNX file
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List => {
            for artifact in &manifest::manifest().artifacts {
                let dims = match (artifact.input_size, artifact.embedding_dim) {
                    (Some(s), _) => format!("input {s}x{s}"),
                    (_, Some(d)) => format!("{d}-dim"),
                    _ => String::new(),
                };
                println!(
                    "{:<22} {:<11} {:<8} {}  sha256:{}",
                    artifact.file, artifact.role, artifact.variant, dims, artifact.sha256
                );
            }
        }
        Commands::Verify { dir } => {
            let dir = dir.unwrap_or_else(presence_core::default_model_dir);
            let mut failures = 0usize;

            for artifact in &manifest::manifest().artifacts {
                let path = dir.join(&artifact.file);
                if !path.exists() {
                    println!("{:<22} missing", artifact.file);
                    continue;
                }
                let digest = manifest::file_digest(&path)
                    .with_context(|| format!("hashing {}", path.display()))?;
                if digest == artifact.sha256 {
                    println!("{:<22} ok", artifact.file);
                } else {
                    println!("{:<22} MISMATCH (got {digest})", artifact.file);
                    failures += 1;
                }
            }

            if failures > 0 {
                bail!("{failures} artifact(s) failed verification");
            }
        }
        Commands::Install { file, dir } => {
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .context("artifact path has no file name")?;
            let Some(artifact) = manifest::lookup(name) else {
                bail!("{name} is not a pinned artifact (see `presence-models list`)");
            };

            let digest = manifest::file_digest(&file)
                .with_context(|| format!("hashing {}", file.display()))?;
            if digest != artifact.sha256 {
                bail!(
                    "digest mismatch for {name}: expected {}, got {digest}",
                    artifact.sha256
                );
            }

            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating {}", dir.display()))?;
            let target = dir.join(name);
            std::fs::copy(&file, &target)
                .with_context(|| format!("copying to {}", target.display()))?;

            tracing::info!(file = name, target = %target.display(), "artifact installed");
            println!("Installed {name} ({} {})", artifact.role, artifact.variant);
        }
        Commands::Inspect { file } => {
            let session = ort::session::Session::builder()?
                .commit_from_file(&file)
                .with_context(|| format!("loading {}", file.display()))?;

            println!("inputs:");
            for input in session.inputs() {
                println!("  {:<12} {:?}", input.name(), input.dtype());
            }
            println!("outputs:");
            for output in session.outputs() {
                println!("  {:<12} {:?}", output.name(), output.dtype());
            }
        }
    }

    Ok(())
}

