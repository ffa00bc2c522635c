use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MqError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("invalid YAML parameter file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid JSON parameter file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    BadRequest(String),

    #[error("parameters do not fit the schema: {0}")]
    SchemaMismatch(String),

    #[error("no path known for input file '{0}'")]
    MissingPath(String),

    #[error("checksum mismatch: {0}")]
    ChecksumMismatch(String),

    #[error("output directory already exists in {}", .0.display())]
    WorkspaceExists(PathBuf),

    #[error("malformed parameter XML: {0}")]
    XmlShape(String),

    #[error("Timeout. No resources available.")]
    GateTimeout,

    #[error("engine timed out after {0}s")]
    EngineTimeout(u64),

    #[error("engine finished with error code {0}")]
    EngineFailure(i32),

    #[error("server not responding")]
    SubmitTimeout,

    #[error("lost heartbeat, server down?")]
    LostHeartbeat,

    #[error("{0}")]
    TaskFailed(String),
}

pub type Result<T> = std::result::Result<T, MqError>;
