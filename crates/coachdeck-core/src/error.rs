use thiserror::Error;

use crate::model::EntityId;

/// Top-level error type for the `coachdeck-core` crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Transport-level failure from the API layer.
    #[error(transparent)]
    Api(#[from] coachdeck_api::Error),

    /// A push frame without a recognizable entity id or state field.
    /// These are dropped at the channel boundary, never thrown across it.
    #[error("malformed push frame: {reason}")]
    MalformedFrame { reason: String },

    /// A command was issued for an entity the store has never seen.
    #[error("unknown entity '{0}'")]
    UnknownEntity(EntityId),

    /// The daemon acknowledged a command with a rejection status.
    #[error("command '{command}' rejected for '{entity}': {message}")]
    CommandRejected {
        entity: EntityId,
        command: String,
        message: String,
    },

    /// Invalid bridge configuration (bad daemon URL, etc.)
    #[error("bridge configuration error: {0}")]
    Config(String),
}
