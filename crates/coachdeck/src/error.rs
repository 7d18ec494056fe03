//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` variants into user-facing errors with actionable
//! help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use coachdeck_core::CoreError;

/// Exit codes for process termination.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the bridge daemon")]
    #[diagnostic(
        code(coachdeck::connection_failed),
        help(
            "Check that the daemon is running and the URL is correct.\n\
             Source: {source}"
        )
    )]
    ConnectionFailed {
        #[source]
        source: coachdeck_api::Error,
    },

    // ── Resources ────────────────────────────────────────────────────
    #[error("Entity '{id}' is not known to the daemon")]
    #[diagnostic(
        code(coachdeck::entity_not_found),
        help("Run: coachdeck entities  to see what the daemon exposes")
    )]
    EntityNotFound { id: String },

    #[error("Command '{command}' rejected for '{entity}': {message}")]
    #[diagnostic(code(coachdeck::command_rejected))]
    CommandRejected {
        entity: String,
        command: String,
        message: String,
    },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(coachdeck::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("No bridge daemon configured")]
    #[diagnostic(
        code(coachdeck::no_daemon),
        help(
            "Pass --daemon, set COACHDECK_DAEMON, or add `daemon = \"http://...\"`\n\
             to the config file at: {path}"
        )
    )]
    NoDaemon { path: String },

    #[error(transparent)]
    #[diagnostic(code(coachdeck::config))]
    Config(Box<figment::Error>),

    // ── Timing ───────────────────────────────────────────────────────
    #[error("Timed out after {seconds}s waiting for {what}")]
    #[diagnostic(
        code(coachdeck::timeout),
        help("The daemon may be up but not streaming; check its logs.")
    )]
    Timeout { seconds: u64, what: String },

    // ── Passthrough ──────────────────────────────────────────────────
    #[error(transparent)]
    Core(CoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for CliError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnknownEntity(id) => Self::EntityNotFound { id: id.to_string() },

            CoreError::CommandRejected {
                entity,
                command,
                message,
            } => Self::CommandRejected {
                entity: entity.to_string(),
                command,
                message,
            },

            CoreError::Api(api) if api.is_transient() => Self::ConnectionFailed { source: api },

            other => Self::Core(other),
        }
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::EntityNotFound { .. } => exit_code::NOT_FOUND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::NoDaemon { .. } | Self::Config(_) => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}
