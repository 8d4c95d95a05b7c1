//! Error types

/// Security layer errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required crypto or storage primitive is missing
    #[error("Unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    /// Operation needs an unlocked vault
    #[error("Storage locked")]
    StorageLocked,

    /// Vault used before `init()`
    #[error("Vault not initialized")]
    NotInitialized,

    /// Wrong password or corrupted ciphertext (deliberately indistinguishable)
    #[error("Decryption failed")]
    Decryption,

    /// Encryption or key derivation error
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Another tab holds the wallet lock
    #[error("Wallet lock held by another tab: {0}")]
    LockContention(String),

    /// Too many attempts
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the key is unblocked
        retry_after_secs: u64,
    },

    /// Password did not open the wallet
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Backing storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
