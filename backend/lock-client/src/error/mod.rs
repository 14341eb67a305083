pub mod config;
pub mod lock;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Lock(#[from] lock::LockError),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}
