// src/error.rs
//! Error handling for the runtime core.
//!
//! Each subsystem gets its own `thiserror` enum; `CoreError` unites them so
//! callers crossing a subsystem boundary only ever propagate one type.

use thiserror::Error;

/// Errors raised by the reflection and variant layer.
#[derive(Error, Debug, Clone)]
pub enum ReflectionError {
    #[error("type `{0}` is not registered")]
    TypeNotRegistered(String),

    #[error("type `{type_name}` has no property `{property}`")]
    UnknownProperty { type_name: String, property: String },

    #[error("cannot convert variant of type {from} to {to}")]
    IncompatibleType { from: &'static str, to: &'static str },

    #[error("`{value}` is not a known enumerant of `{type_name}`")]
    UnknownEnumerant { type_name: String, value: String },

    #[error("property `{0}` is a constant and cannot be written")]
    ConstantWrite(String),

    #[error("property `{type_name}::{property}` is not an Array/Set/Map property")]
    NotAContainer { type_name: String, property: String },

    #[error("container index out of bounds: {index} (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("container has no entry for key `{0}`")]
    UnknownKey(String),
}

/// Errors raised while reading, writing, or patching an object graph.
#[derive(Error, Debug, Clone)]
pub enum SerializerError {
    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("unsupported stream version {found} (expected <= {max_supported})")]
    UnsupportedVersion { found: u8, max_supported: u8 },

    #[error("node {from} references unresolved node {to}")]
    UnresolvedReference { from: uuid::Uuid, to: uuid::Uuid },

    #[error("node type `{name}` is not registered")]
    UnknownType { name: String },

    #[error("patch for type `{type_name}` failed: {reason}")]
    PatchFailed { type_name: String, reason: String },
}

/// Errors raised by the resource manager.
#[derive(Error, Debug, Clone)]
pub enum ResourceError {
    #[error("asset `{0}` was not found")]
    AssetNotFound(String),

    #[error("loader for `{0}` failed: {1}")]
    LoaderFailed(String, String),

    #[error("resource `{id}` is not of the requested type")]
    WrongResourceType { id: String },

    #[error("memory budget exceeded while loading `{0}`")]
    OutOfBudget(String),

    #[error("resource `{0}` already has a load task in flight")]
    AlreadyQueued(String),

    #[error("loader for `{0}` returned a quality transition that changes the ladder length")]
    InvalidQualityTransition(String),

    #[error("resource `{0}` is not ready and has no fallback to serve")]
    NotReady(String),
}

/// Errors raised by the world and its components.
#[derive(Error, Debug, Clone)]
pub enum WorldError {
    #[error("game object {0} no longer exists")]
    UseAfterFree(String),

    #[error("hierarchy operation would create a cycle or cross hierarchy types")]
    HierarchyViolation,

    #[error("cannot acquire write marker while readers are active")]
    WriteWhileReading,

    #[error("cannot acquire read marker while a writer is active")]
    ReadWhileWriting,

    #[error("init batch `{0}` did not finish within its time budget")]
    BatchTimeout(String),
}

/// Errors raised by the blackboard.
#[derive(Error, Debug, Clone)]
pub enum BlackboardError {
    #[error("blackboard is in an invalid state")]
    Invalid,

    #[error("no entry named `{0}`")]
    UnknownEntry(String),

    #[error("entry `{0}` does not hold a numeric value")]
    NotNumeric(String),
}

/// Top-level error type uniting every subsystem.
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    #[error(transparent)]
    Reflection(#[from] ReflectionError),

    #[error(transparent)]
    Serializer(#[from] SerializerError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    World(#[from] WorldError),

    #[error(transparent)]
    Blackboard(#[from] BlackboardError),

    #[error("{0}")]
    Custom(String),

    /// Rich context chaining: each `.context()` call wraps the previous error.
    #[error("{message}: {source}")]
    WithContext {
        message: String,
        #[source]
        source: Box<CoreError>,
    },
}

impl CoreError {
    #[inline]
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Add context to any error, chainable across subsystem boundaries.
    #[inline]
    pub fn context(self, message: impl Into<String>) -> Self {
        Self::WithContext {
            message: message.into(),
            source: Box::new(self),
        }
    }
}

/// Convenient `Result` alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Lets any subsystem `Result` gain context without matching on its error type.
pub trait ResultExt<T> {
    fn with_context(self, message: impl Into<String>) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<CoreError>,
{
    #[inline]
    fn with_context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().context(message))
    }
}
