use crate::models::digest::{DigestAlgorithm, LEGACY_DEFAULT_ALGORITHM};
use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Algorithm assumed for bare checksum values on ingest.
    pub default_checksum_algorithm: DigestAlgorithm,
    /// Search page size used when a request names none.
    pub default_page_size: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Legacy datastream API for a digital-object repository")]
pub struct Args {
    /// Host to bind to (overrides FCREPO_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FCREPO_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where datastream content is stored (overrides FCREPO_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides FCREPO_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Checksum algorithm for bare checksum values (overrides FCREPO_DEFAULT_CHECKSUM_ALGORITHM)
    #[arg(long)]
    pub default_checksum_algorithm: Option<String>,

    /// Default search page size (overrides FCREPO_DEFAULT_PAGE_SIZE)
    #[arg(long)]
    pub default_page_size: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Read and parse an optional numeric environment variable.
fn env_number<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Result<(Self, bool)> {
        // --- Environment fallback ---
        let env_host = env::var("FCREPO_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_number("FCREPO_PORT", 3000u16)?;
        let env_storage =
            env::var("FCREPO_STORAGE_DIR").unwrap_or_else(|_| "./data/content".into());
        let env_db = env::var("FCREPO_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/fcrepo.db".into());
        let env_algorithm =
            env::var("FCREPO_DEFAULT_CHECKSUM_ALGORITHM")
                .unwrap_or_else(|_| LEGACY_DEFAULT_ALGORITHM.to_string());
        let env_page_size = env_number("FCREPO_DEFAULT_PAGE_SIZE", 25usize)?;

        // --- Merge ---
        let algorithm = args.default_checksum_algorithm.unwrap_or(env_algorithm);
        let default_checksum_algorithm = algorithm
            .parse::<DigestAlgorithm>()
            .with_context(|| format!("default checksum algorithm `{}`", algorithm))?;
        let default_page_size = args.default_page_size.unwrap_or(env_page_size);
        if default_page_size == 0 {
            anyhow::bail!("default page size must be greater than zero");
        }

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            default_checksum_algorithm,
            default_page_size,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
