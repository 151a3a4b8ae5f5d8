//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors
//! with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use zigmesh_config::ConfigError;
use zigmesh_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
    pub const CAPTURE: i32 = 9;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Capture ──────────────────────────────────────────────────────
    #[error("Could not read capture {path}")]
    #[diagnostic(
        code(zigmesh::capture_unreadable),
        help("Pass a file with one bridge event per line, or `-` to read stdin.")
    )]
    CaptureUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Capture {path} contained no bridge events")]
    #[diagnostic(
        code(zigmesh::capture_empty),
        help("Each line must be a JSON object such as {{\"kind\": \"device_announced\", ...}}.")
    )]
    CaptureEmpty { path: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(zigmesh::not_found),
        help("Run: zigmesh {list_command} to see available {resource_type}s")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    // ── Bridge ───────────────────────────────────────────────────────
    #[error("Bridge error ({code}): {message}")]
    #[diagnostic(code(zigmesh::bridge))]
    Bridge { code: String, message: String },

    #[error("{message}")]
    #[diagnostic(
        code(zigmesh::timeout),
        help("Raise the deadline under [operations.timeouts] in the config file.")
    )]
    Timeout { message: String },

    #[error("{message}")]
    #[diagnostic(
        code(zigmesh::conflict),
        help("Wait for the in-flight operation to finish and try again.")
    )]
    Conflict { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(zigmesh::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file already exists at {path}")]
    #[diagnostic(
        code(zigmesh::config_exists),
        help("Use --force to overwrite it.")
    )]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(code(zigmesh::config))]
    Config(Box<figment::Error>),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not render JSON: {0}")]
    #[diagnostic(code(zigmesh::json))]
    Json(#[from] serde_json::Error),
}

impl From<figment::Error> for CliError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Conflict { .. } => exit_code::CONFLICT,
            Self::Bridge { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::ConfigExists { .. } | Self::Config(_) => {
                exit_code::USAGE
            }
            Self::CaptureUnreadable { .. } | Self::CaptureEmpty { .. } => exit_code::CAPTURE,
            Self::Io(_) | Self::Json(_) => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::Serialization(e) => CliError::Validation {
                field: "config".into(),
                reason: format!("failed to serialize config: {e}"),
            },
            ConfigError::Figment(e) => CliError::Config(e),
            ConfigError::Io(e) => CliError::Io(e),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::DeviceNotFound { identifier } => CliError::NotFound {
                resource_type: "device".into(),
                identifier,
                list_command: "devices list <capture>".into(),
            },

            CoreError::Timeout { .. } => CliError::Timeout {
                message: err.to_string(),
            },

            CoreError::OperationInFlight { .. } => CliError::Conflict {
                message: err.to_string(),
            },

            CoreError::ValidationFailed { message } => CliError::Validation {
                field: "input".into(),
                reason: message,
            },

            CoreError::MalformedTelemetry { reason } => CliError::Validation {
                field: "telemetry".into(),
                reason,
            },

            CoreError::Transport { message } => CliError::Bridge {
                code: "transport".into(),
                message,
            },

            CoreError::BridgeRejected { kind, reason } => CliError::Bridge {
                code: kind.to_string(),
                message: reason,
            },

            CoreError::StaleSnapshot { .. } | CoreError::ControllerStopped => CliError::Bridge {
                code: "internal".into(),
                message: err.to_string(),
            },

            CoreError::Internal(message) => CliError::Bridge {
                code: "internal".into(),
                message,
            },
        }
    }
}
