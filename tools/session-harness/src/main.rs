//! CLI session harness for exercising the secure session core
//!
//! This tool allows testing:
//! - Packed-blob encryption and decryption
//! - Vault reads and writes against a SQLite file
//! - Wallet lock contention between processes sharing that file
//! - Forced takeover of an abandoned lock

use clap::{Parser, Subcommand};
use dgen_security::{
    crypto, init_logging, LogFormat, SecurityConfig, TabCoordinator, Vault,
};
use dgen_storage_sqlite::sqlite_environment;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "session-harness")]
#[command(about = "dgen secure session testing harness", long_about = None)]
struct Cli {
    /// Emit JSON log lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Optional JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt text into a packed blob
    Encrypt {
        /// Password
        #[arg(short, long)]
        password: String,

        /// Plaintext
        plaintext: String,
    },

    /// Decrypt a packed blob
    Decrypt {
        /// Password
        #[arg(short, long)]
        password: String,

        /// Base64 packed blob
        blob: String,
    },

    /// Store a value in the vault
    VaultPut {
        /// Shared database file
        #[arg(short, long, default_value = "dgen-session.db")]
        db: PathBuf,

        /// Vault identity
        #[arg(short, long)]
        identity: Option<String>,

        /// Password
        #[arg(short, long)]
        password: String,

        /// Record key
        key: String,

        /// Value to encrypt
        value: String,
    },

    /// Read a value from the vault
    VaultGet {
        /// Shared database file
        #[arg(short, long, default_value = "dgen-session.db")]
        db: PathBuf,

        /// Vault identity
        #[arg(short, long)]
        identity: Option<String>,

        /// Password
        #[arg(short, long)]
        password: String,

        /// Record key
        key: String,
    },

    /// Acquire the wallet lock and hold it with a heartbeat
    Hold {
        /// Shared database file
        #[arg(short, long, default_value = "dgen-session.db")]
        db: PathBuf,

        /// Seconds to hold before releasing
        #[arg(short, long, default_value = "30")]
        seconds: u64,
    },

    /// Try to acquire the wallet lock once, then release it
    Acquire {
        /// Shared database file
        #[arg(short, long, default_value = "dgen-session.db")]
        db: PathBuf,

        /// Attempts before giving up
        #[arg(short, long, default_value = "3")]
        retries: u32,

        /// Delay between attempts
        #[arg(long, default_value = "1000")]
        retry_delay_ms: u64,
    },

    /// Show the current lock record
    Status {
        /// Shared database file
        #[arg(short, long, default_value = "dgen-session.db")]
        db: PathBuf,
    },

    /// Take the lock regardless of its holder and hold it
    Takeover {
        /// Shared database file
        #[arg(short, long, default_value = "dgen-session.db")]
        db: PathBuf,

        /// Seconds to hold before releasing
        #[arg(short, long, default_value = "30")]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    init_logging(format)?;

    let config = match &cli.config {
        Some(path) => SecurityConfig::from_path(path)?,
        None => SecurityConfig::default(),
    };

    match cli.command {
        Commands::Encrypt {
            password,
            plaintext,
        } => {
            println!("{}", crypto::encrypt(&plaintext, &password)?);
        }
        Commands::Decrypt { password, blob } => {
            if !crypto::is_valid_packed_format(&blob) {
                anyhow::bail!("Not a packed blob");
            }
            println!("{}", crypto::decrypt(&blob, &password)?.as_str());
        }
        Commands::VaultPut {
            db,
            identity,
            password,
            key,
            value,
        } => {
            let vault = open_vault(&db, &config, &password, identity.as_deref()).await?;
            vault.store(&key, &value).await?;
            vault.lock();
            info!("Stored {}", key);
        }
        Commands::VaultGet {
            db,
            identity,
            password,
            key,
        } => {
            let vault = open_vault(&db, &config, &password, identity.as_deref()).await?;
            let value = vault.retrieve(&key).await?;
            vault.lock();
            match value {
                Some(value) => println!("{}", value.as_str()),
                None => anyhow::bail!("No readable value under {}", key),
            }
        }
        Commands::Hold { db, seconds } => {
            let tabs = coordinator(&db, &config)?;
            if !tabs.try_acquire_default().await? {
                anyhow::bail!("Lock held by {}", holder_name(&tabs)?);
            }
            hold(&tabs, seconds).await?;
        }
        Commands::Acquire {
            db,
            retries,
            retry_delay_ms,
        } => {
            let tabs = coordinator(&db, &config)?;
            let acquired = tabs
                .try_acquire_wallet_lock(retries, Duration::from_millis(retry_delay_ms))
                .await?;
            if acquired {
                info!("Acquired as {}", tabs.tab_id());
                tabs.release_wallet_lock()?;
            } else {
                warn!("Lock held by {}", holder_name(&tabs)?);
                std::process::exit(1);
            }
        }
        Commands::Status { db } => {
            let tabs = coordinator(&db, &config)?;
            print_status(&tabs)?;
        }
        Commands::Takeover { db, seconds } => {
            let tabs = coordinator(&db, &config)?;
            let previous = holder_name(&tabs)?;
            tabs.force_takeover().await?;
            info!("Took over from {}", previous);
            hold(&tabs, seconds).await?;
        }
    }

    Ok(())
}

async fn open_vault(
    db: &Path,
    config: &SecurityConfig,
    password: &str,
    identity: Option<&str>,
) -> anyhow::Result<Vault> {
    let env = sqlite_environment(db)?;
    let vault = Vault::new(&env, &config.vault);
    vault.init().await?;
    vault.unlock(password, identity).await?;
    Ok(vault)
}

fn coordinator(db: &Path, config: &SecurityConfig) -> anyhow::Result<TabCoordinator> {
    let env = sqlite_environment(db)?;
    Ok(TabCoordinator::new(&env, config.tab_sync.clone())?)
}

fn holder_name(tabs: &TabCoordinator) -> anyhow::Result<String> {
    Ok(tabs.lock_holder()?.unwrap_or_else(|| "nobody".to_string()))
}

fn print_status(tabs: &TabCoordinator) -> anyhow::Result<()> {
    let info = tabs.lock_info()?;
    let since = info
        .time
        .and_then(|ms| chrono::DateTime::from_timestamp_millis(ms as i64))
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "-".to_string());

    println!("Holder:    {}", info.holder.as_deref().unwrap_or("-"));
    println!("Locked at: {}", since);
    println!("Alive:     {}", info.is_alive);
    println!("Live lock: {}", tabs.is_locked()?);
    Ok(())
}

async fn hold(tabs: &TabCoordinator, seconds: u64) -> anyhow::Result<()> {
    info!("Holding wallet lock as {} for {}s", tabs.tab_id(), seconds);

    let pb = ProgressBar::new(seconds);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len}s {msg}")?
            .progress_chars("=>-"),
    );

    for _ in 0..seconds {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            _ = tokio::signal::ctrl_c() => {
                pb.abandon_with_message("interrupted");
                break;
            }
        }
        if !tabs.has_lock() {
            pb.abandon_with_message("lock lost");
            warn!("Lock taken over by {}", holder_name(tabs)?);
            return Ok(());
        }
        pb.inc(1);
    }

    tabs.release_wallet_lock()?;
    pb.finish_with_message("released");
    Ok(())
}
