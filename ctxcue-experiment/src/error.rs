use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StaircaseError {
    #[error("invalid staircase input: {field} = {value}")]
    InvalidInput { field: &'static str, value: f64 },

    #[error("invalid staircase parameters: {0}")]
    InvalidParams(String),

    #[error("staircase already finalized after {updates} updates")]
    Finalized { updates: usize },
}

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("failed to read trial layouts from {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        cause: csv::Error,
    },

    #[error("malformed layout row {row}: {message}")]
    MalformedRow { row: usize, message: String },

    #[error("trial layout file {} contains no rows", path.display())]
    Empty { path: PathBuf },
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("vibration device unavailable")]
    Unavailable,

    #[error("failed to open serial port {port}")]
    Open {
        port: String,
        #[source]
        cause: std::io::Error,
    },

    #[error("unsupported baud rate {0}")]
    UnsupportedBaud(u32),

    #[error("failed to configure serial line on {port}")]
    Configure {
        port: String,
        #[source]
        cause: std::io::Error,
    },

    #[error("serial write failed")]
    Write(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum LogError {
    #[error("failed to create log {}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        cause: std::io::Error,
    },

    #[error("failed to write log row")]
    Csv(#[from] csv::Error),

    #[error("failed to flush log")]
    Io(#[from] std::io::Error),

    #[error("failed to write summary")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        cause: std::io::Error,
    },

    #[error("failed to parse config file {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        cause: serde_json::Error,
    },

    #[error("invalid configuration: {field} {problem}")]
    Invalid { field: &'static str, problem: String },
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Staircase(#[from] StaircaseError),

    #[error("subject id must not be empty")]
    MissingSubject,
}
