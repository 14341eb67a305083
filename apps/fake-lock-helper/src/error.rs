use common::ErrorLocation;

use std::io::Error as IoError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HelperError {
    #[error("Config Error: {message} {location}")]
    Config {
        message: String,
        location: ErrorLocation,
    },

    #[error("IO Error: {message}: {source} {location}")]
    Io {
        message: String,
        location: ErrorLocation,
        #[source]
        source: IoError,
    },

    #[error("Logger Error: {message} {location}")]
    Logger {
        message: String,
        location: ErrorLocation,
    },
}
