// src/bin/cli.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! CLI over the multipart upload manager: plan, probe, initialize, complete,
//! size and policy. Every command prints pretty JSON on stdout.
//!
//! Examples:
//! ```bash
//! s3ff-cli plan        1073741824 -p 67108864      # layout only, no store access
//! s3ff-cli probe                                   # credentials / connectivity check
//! s3ff-cli initialize  movie.mp4 1073741824        # signed part URLs + upload token
//! s3ff-cli complete    completion.json             # signed completion request
//! s3ff-cli size        uploads/4f0c.../movie.mp4   # committed object size
//! s3ff-cli policy      uploads/4f0c.../movie.mp4   # scoped upload policy
//! ```
//!
//! Storage is configured through `S3FF_*` / `AWS_*` variables (a `.env` file
//! is honoured). Set `S3FF_SECRET_KEY` to bind object keys to upload tokens.

use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use s3ff::constants::DEFAULT_PART_SIZE;
use s3ff::{
    plan, upload_policy, MultipartManager, StorageConfig, StorageKind, UploadCompletion,
    UploadFinalization, UploadInitialization, UploadSigner,
};

/// Environment variable holding the upload token secret.
const SECRET_KEY_VAR: &str = "S3FF_SECRET_KEY";

/// Print a value as pretty JSON, exiting quietly on a broken pipe.
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match writeln!(io::stdout(), "{json}") {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::BrokenPipe => {
            // Gracefully exit on broken pipe (e.g., when piped to head)
            std::process::exit(0);
        }
        Err(e) => Err(e.into()),
    }
}

// -- Commands

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[arg(short = 'v',
        long,
        action = ArgAction::Count,
        help = "Increase log verbosity: -v = Info, -vv = Debug",
    )]
    verbose: u8,

    /// Override S3FF_STORAGE_KIND.
    #[arg(long = "storage-kind", value_enum)]
    storage_kind: Option<StorageKind>,

    /// Override S3FF_BUCKET.
    #[arg(long)]
    bucket: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the part layout for a file, without touching the store.
    Plan {
        /// File size in bytes.
        file_size: u64,

        /// Requested part size in bytes (raised/capped to the store limits).
        #[arg(short = 'p', long = "part-size")]
        part_size: Option<u64>,
    },

    /// Sign and abort a one-byte probe upload to check credentials.
    Probe,

    /// Start an upload of `name` and print the signed part URLs.
    Initialize {
        /// File name; the object key is `{prefix}{random}/{name}`.
        name: String,

        /// File size in bytes.
        file_size: u64,

        #[arg(short = 'p', long = "part-size")]
        part_size: Option<u64>,
    },

    /// Sign the completion request for the uploads reported in a JSON file.
    Complete {
        /// JSON file with `object_key`, `upload_id`, `parts` and, when a
        /// secret is configured, `upload_signature`.
        completion: PathBuf,
    },

    /// Print the size of a finished upload.
    Size { object_key: String },

    /// Print the IAM policy that scopes temporary credentials to one upload.
    Policy { object_key: String },
}

/// `initialize` output.
#[derive(Serialize)]
struct PreparedUpload {
    #[serde(flatten)]
    upload: UploadInitialization,
    #[serde(skip_serializing_if = "Option::is_none")]
    upload_signature: Option<String>,
}

/// `complete` input.
#[derive(Deserialize)]
struct CompletionRequest {
    #[serde(flatten)]
    completion: UploadCompletion,
    #[serde(default)]
    upload_signature: Option<String>,
}

/// `complete` output; the token is re-issued so a later step can trust the key.
#[derive(Serialize)]
struct FinalizedUpload {
    #[serde(flatten)]
    finalization: UploadFinalization,
    #[serde(skip_serializing_if = "Option::is_none")]
    upload_signature: Option<String>,
}

#[derive(Serialize)]
struct ObjectSize<'a> {
    object_key: &'a str,
    size: u64,
}

fn load_config(cli: &Cli) -> Result<StorageConfig> {
    // main() has already loaded .env into the process environment.
    config_with_overrides(cli, |key| std::env::var(key).ok())
}

/// Resolve the configuration through `env`, with `--storage-kind` and
/// `--bucket` taking precedence so they can stand in for unset variables.
fn config_with_overrides<F>(cli: &Cli, env: F) -> Result<StorageConfig>
where
    F: Fn(&str) -> Option<String>,
{
    StorageConfig::from_lookup(|key| match key {
        "S3FF_STORAGE_KIND" if cli.storage_kind.is_some() => cli.storage_kind.map(|k| k.as_str().to_string()),
        "S3FF_BUCKET" if cli.bucket.is_some() => cli.bucket.clone(),
        _ => env(key),
    })
    .context("reading storage configuration")
}

fn signer_from_env() -> Option<UploadSigner> {
    std::env::var(SECRET_KEY_VAR)
        .ok()
        .filter(|s| !s.is_empty())
        .map(UploadSigner::new)
}

async fn manager_for(cfg: &StorageConfig) -> Result<MultipartManager> {
    if !MultipartManager::supported(cfg) {
        bail!("storage kind `{}` cannot accept direct uploads", cfg.kind);
    }
    Ok(MultipartManager::from_storage(cfg).await?)
}

async fn initialize_cmd(cfg: &StorageConfig, name: &str, file_size: u64, part_size: Option<u64>) -> Result<()> {
    let manager = manager_for(cfg).await?;
    let object_key = cfg.new_object_key(name);
    let upload = manager.initialize_upload(&object_key, file_size, part_size).await?;

    let upload_signature = signer_from_env().map(|signer| signer.sign(&upload.object_key));
    if upload_signature.is_none() {
        warn!("{SECRET_KEY_VAR} not set, upload is not bound to a token");
    }
    print_json(&PreparedUpload { upload, upload_signature })
}

async fn complete_cmd(cfg: &StorageConfig, path: &Path) -> Result<()> {
    let data = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let request: CompletionRequest =
        serde_json::from_slice(&data).with_context(|| format!("parsing {}", path.display()))?;
    let object_key = request.completion.object_key.clone();

    let signer = signer_from_env();
    if let Some(signer) = &signer {
        let Some(token) = request.upload_signature.as_deref() else {
            bail!("completion for `{object_key}` carries no upload_signature");
        };
        let signed_key = signer
            .unsign(token, cfg.upload.upload_duration)
            .with_context(|| format!("verifying upload token for `{object_key}`"))?;
        if signed_key != object_key {
            bail!("upload token was issued for `{signed_key}`, not `{object_key}`");
        }
    }

    let manager = manager_for(cfg).await?;
    let finalization = manager.complete_upload(request.completion).await?;
    let upload_signature = signer.map(|signer| signer.sign(&object_key));
    print_json(&FinalizedUpload { finalization, upload_signature })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Loads any variables from .env file that are not already set
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    // Initialize tracing-log bridge to capture log crate messages from dependencies
    tracing_log::LogTracer::init().ok();

    match &cli.cmd {
        Command::Plan { file_size, part_size } => {
            let parts = plan(*file_size, part_size.unwrap_or(DEFAULT_PART_SIZE))?;
            print_json(&parts)?;
        }

        Command::Probe => {
            let cfg = load_config(&cli)?;
            let manager = manager_for(&cfg).await?;
            manager.test_upload().await?;
            info!("probe against bucket {} succeeded", cfg.bucket);
            print_json(&serde_json::json!({ "bucket": cfg.bucket, "ok": true }))?;
        }

        Command::Initialize { name, file_size, part_size } => {
            let cfg = load_config(&cli)?;
            initialize_cmd(&cfg, name, *file_size, *part_size).await?;
        }

        Command::Complete { completion } => {
            let cfg = load_config(&cli)?;
            complete_cmd(&cfg, completion).await?;
        }

        Command::Size { object_key } => {
            let cfg = load_config(&cli)?;
            let manager = manager_for(&cfg).await?;
            let size = manager.get_upload_size(object_key).await?;
            print_json(&ObjectSize { object_key, size })?;
        }

        Command::Policy { object_key } => {
            let cfg = load_config(&cli)?;
            print_json(&upload_policy(&cfg.bucket, object_key))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_flags_stand_in_for_unset_variables() {
        let cli = Cli::try_parse_from(["s3ff-cli", "--storage-kind", "minio", "--bucket", "media", "probe"]).unwrap();
        let cfg = config_with_overrides(&cli, no_env).unwrap();
        assert_eq!(cfg.kind, StorageKind::Minio);
        assert_eq!(cfg.bucket, "media");
    }

    #[test]
    fn test_flags_override_environment() {
        let env = |key: &str| match key {
            "S3FF_STORAGE_KIND" => Some("minio".to_string()),
            "S3FF_BUCKET" => Some("from-env".to_string()),
            "S3FF_REGION" => Some("eu-west-1".to_string()),
            _ => None,
        };
        let cli = Cli::try_parse_from(["s3ff-cli", "--bucket", "from-flag", "probe"]).unwrap();
        let cfg = config_with_overrides(&cli, env).unwrap();
        assert_eq!(cfg.kind, StorageKind::Minio);
        assert_eq!(cfg.bucket, "from-flag");
        assert_eq!(cfg.region(), "eu-west-1");

        let cli = Cli::try_parse_from(["s3ff-cli", "probe"]).unwrap();
        assert_eq!(config_with_overrides(&cli, env).unwrap().bucket, "from-env");
    }

    #[test]
    fn test_missing_bucket_is_reported() {
        let cli = Cli::try_parse_from(["s3ff-cli", "--storage-kind", "aws", "probe"]).unwrap();
        let err = config_with_overrides(&cli, no_env).unwrap_err();
        assert!(format!("{err:#}").contains("S3FF_BUCKET"), "{err:#}");
    }
}
