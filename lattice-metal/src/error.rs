//! Kernel error types.
//!
//! Only programming errors surface here. Tolerant paths (watching a
//! non-object, `try_set` through a missing link, cycles in dependent keys)
//! never produce an error.

use crate::object::ObjectId;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, KernelError>;

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// Setting a read-only computed property or alias.
    #[error("Cannot set read-only property \"{key}\" on object {object}")]
    ReadOnly { key: String, object: ObjectId },

    /// Mutating watch/dependency/cache/chain/listener state after the
    /// object's metadata was destroyed.
    #[error("metadata for object {object} has been destroyed")]
    MetaDestroyed { object: ObjectId },

    /// Strict `set` on an object that finished destruction.
    #[error("calling set on destroyed object {object}.{key}")]
    SetOnDestroyed { key: String, object: ObjectId },

    /// Strict path `set` whose intermediate object could not be resolved.
    #[error("Property set failed: object in path \"{path}\" could not be found or was destroyed")]
    MissingPathTarget { path: String },

    #[error("Property set failed: You passed an empty path")]
    EmptyPath,

    #[error("invalid brace expansion in \"{pattern}\": {reason}")]
    InvalidBraceExpansion { pattern: String, reason: &'static str },

    /// Writing an unknown key through a proxy that has no content.
    #[error("Cannot delegate set('{key}') to the 'content' property of a proxy: its 'content' is undefined")]
    ProxyWithoutContent { key: String },

    #[error("invalid kernel configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("invalid value {value:?} for environment variable {var}")]
    InvalidEnv { var: &'static str, value: String },
}
