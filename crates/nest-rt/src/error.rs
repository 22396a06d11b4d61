//! Error types for the Nest runtime.
//!
//! Every fallible operation in the crate returns [`Result`]. The variants
//! fall into three groups:
//!
//! - object model errors (unknown classes, missing selectors, bad arguments)
//! - launch task registration errors (oversized prefixes, duplicates, late
//!   registrations)
//! - synthesis errors (selectors that are not dynamic accessors, and
//!   accessors with no implementation for their type and ownership)

use crate::runtime::ClassId;
use std::fmt;

/// Errors that can occur in the Nest runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Class name already exists in the registry.
    ClassAlreadyExists {
        /// The duplicate name.
        name: String,
    },

    /// Class identifier does not belong to the registry.
    UnknownClass {
        /// The unknown identifier.
        class: ClassId,
    },

    /// Selector name is empty.
    InvalidSelector,

    /// Selector not found in class or inheritance chain.
    SelectorNotFound {
        /// The selector that was sent.
        selector: String,
    },

    /// Type encoding that no accessor can be derived from.
    InvalidEncoding {
        /// The offending encoding.
        encoding: String,
    },

    /// Argument count mismatch for an implementation.
    ArgumentCountMismatch {
        /// Expected number of arguments
        expected: usize,
        /// Actual number of arguments provided
        got: usize,
    },

    /// Argument does not match the type encoding of the accessor.
    ArgumentTypeMismatch {
        /// Expected type encoding
        expected: String,
        /// Kind of the value that was passed
        got: String,
        /// Argument index
        index: usize,
    },

    /// Launch task selector prefix exceeds the configured bound.
    PrefixTooLong {
        /// Length of the rejected prefix in bytes.
        len: usize,
        /// The configured bound.
        max: usize,
    },

    /// A launch task with the same prefix, handler and cleanup is already
    /// registered.
    DuplicateLaunchTask {
        /// Prefix of the duplicate task.
        prefix: String,
    },

    /// The launch checkpoint already fired; no further tasks are accepted.
    LaunchTasksAlreadyPerformed,

    /// A launch task handler reported a failure.
    LaunchTaskFailed {
        /// The matched selector.
        selector: String,
        /// Human-readable reason for failure.
        reason: String,
    },

    /// Selector does not name an accessor of any dynamic property.
    NotDynamicAccessor {
        /// The selector that was resolved.
        selector: String,
    },

    /// No getter or setter body is registered for the accessor's type
    /// encoding and ownership attributes.
    MissingImplementation {
        /// Name of the class the accessor was resolved for.
        class: String,
        /// The accessor selector.
        selector: String,
        /// Implementation key that was looked up.
        key: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ClassAlreadyExists { name } => {
                write!(f, "Class '{name}' already exists in registry")
            }
            Error::UnknownClass { class } => {
                write!(f, "Unknown class {class}")
            }
            Error::InvalidSelector => write!(f, "Selector name is empty"),
            Error::SelectorNotFound { selector } => {
                write!(f, "Does not respond to selector '{selector}'")
            }
            Error::InvalidEncoding { encoding } => {
                write!(f, "Invalid type encoding '{encoding}'")
            }
            Error::ArgumentCountMismatch { expected, got } => {
                write!(
                    f,
                    "Argument count mismatch: expected {expected}, got {got}"
                )
            }
            Error::ArgumentTypeMismatch {
                expected,
                got,
                index,
            } => {
                write!(
                    f,
                    "Argument type mismatch at index {index}: expected '{expected}', got {got}"
                )
            }
            Error::PrefixTooLong { len, max } => {
                write!(
                    f,
                    "Launch task prefix is {len} bytes, limit is {max}"
                )
            }
            Error::DuplicateLaunchTask { prefix } => {
                write!(f, "Launch task '{prefix}' is already registered")
            }
            Error::LaunchTasksAlreadyPerformed => {
                write!(f, "Launch tasks were already performed")
            }
            Error::LaunchTaskFailed { selector, reason } => {
                write!(f, "Launch task '{selector}' failed: {reason}")
            }
            Error::NotDynamicAccessor { selector } => {
                write!(f, "'{selector}' is not a dynamic property accessor")
            }
            Error::MissingImplementation {
                class,
                selector,
                key,
            } => {
                write!(
                    f,
                    "No implementation for {class} '{selector}' ({key})"
                )
            }
        }
    }
}

impl std::error::Error for Error {}

/// Result type for Nest runtime operations.
pub type Result<T> = std::result::Result<T, Error>;
