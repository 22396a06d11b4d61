//! Level-filtered logging for the Nest runtime.
//!
//! The runtime logs through the macros exported here. Every record carries
//! the module path of the call site, so output can be narrowed to one
//! subsystem with [`set_target_filter`].
//!
//! Records are written to stderr so they never interleave with the output of
//! the host program.
//!
//! # Configuration
//!
//! The level defaults to [`Level::Warn`]. It can be set programmatically with
//! [`set_level`], or read once from the `NEST_LOG` environment variable with
//! [`init_from_env`].
//!
//! # Example
//!
//! ```
//! use nest_log::{debug, info, warn, Level};
//!
//! nest_log::set_level(Level::Debug);
//!
//! let class = "Foo";
//! info!("preparing class {}", class);
//! debug!("pending properties: {:?}", ["name", "title"]);
//! warn!("launch task skipped");
//! ```

use std::fmt::Arguments;
use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{OnceLock, RwLock};

/// Name of the environment variable read by [`init_from_env`].
pub const ENV_VAR: &str = "NEST_LOG";

/// Severity of a log record.
///
/// Lower numeric values are more severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Failures the caller has to act on
    Error = 0,
    /// Skipped work and rejected registrations
    Warn = 1,
    /// Lifecycle milestones
    Info = 2,
    /// Per-class and per-accessor detail
    Debug = 3,
    /// Per-method detail
    Trace = 4,
}

impl Level {
    const fn color_code(self) -> &'static str {
        match self {
            Level::Error => "\x1b[31m",
            Level::Warn => "\x1b[33m",
            Level::Info => "\x1b[32m",
            Level::Debug => "\x1b[36m",
            Level::Trace => "\x1b[35m",
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Level::Error,
            1 => Level::Warn,
            2 => Level::Info,
            3 => Level::Debug,
            _ => Level::Trace,
        }
    }

    /// Returns the upper-case name of this level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    /// Parses a level name, ignoring case.
    ///
    /// # Example
    ///
    /// ```
    /// use nest_log::Level;
    ///
    /// assert_eq!(Level::from_str("warn"), Ok(Level::Warn));
    /// assert_eq!(Level::from_str("TRACE"), Ok(Level::Trace));
    /// assert!(Level::from_str("loud").is_err());
    /// ```
    ///
    /// # Errors
    ///
    /// Returns the offending input wrapped in a message if it names no level.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ERROR" => Ok(Level::Error),
            "WARN" | "WARNING" => Ok(Level::Warn),
            "INFO" => Ok(Level::Info),
            "DEBUG" => Ok(Level::Debug),
            "TRACE" => Ok(Level::Trace),
            _ => Err(format!("Invalid log level: {s}")),
        }
    }
}

/// The process-wide logger.
///
/// Obtained through [`get_logger`]. The level is an atomic so checks on the
/// hot path never lock; the target filter is only read once a record has
/// passed the level check.
pub struct Logger {
    level: AtomicU8,
    target_filter: RwLock<Option<String>>,
}

impl Logger {
    const fn new(level: Level) -> Self {
        Logger {
            level: AtomicU8::new(level as u8),
            target_filter: RwLock::new(None),
        }
    }

    /// Sets the most verbose level that will be written.
    pub fn set_level(&self, level: Level) {
        self.level.store(level as u8, Ordering::SeqCst);
    }

    /// Returns the current level.
    pub fn level(&self) -> Level {
        Level::from_u8(self.level.load(Ordering::Relaxed))
    }

    /// Checks whether a record at `level` would pass the level check.
    pub fn enabled(&self, level: Level) -> bool {
        level as u8 <= self.level.load(Ordering::Relaxed)
    }

    /// Restricts output to targets starting with `prefix`.
    ///
    /// # Panics
    ///
    /// Panics if the filter lock is poisoned.
    pub fn set_target_filter(&self, prefix: &str) {
        *self.target_filter.write().unwrap() = Some(prefix.to_string());
    }

    /// Removes the target filter.
    ///
    /// # Panics
    ///
    /// Panics if the filter lock is poisoned.
    pub fn clear_target_filter(&self) {
        *self.target_filter.write().unwrap() = None;
    }

    /// Checks whether a record for `target` passes the target filter.
    ///
    /// # Panics
    ///
    /// Panics if the filter lock is poisoned.
    pub fn target_enabled(&self, target: &str) -> bool {
        match self.target_filter.read().unwrap().as_deref() {
            Some(prefix) => target.starts_with(prefix),
            None => true,
        }
    }
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

/// Returns the global logger, creating it at [`Level::Warn`] on first use.
pub fn get_logger() -> &'static Logger {
    LOGGER.get_or_init(|| Logger::new(Level::Warn))
}

/// Sets the level of the global logger.
pub fn set_level(level: Level) {
    get_logger().set_level(level);
}

/// Sets the level of the global logger from a level name.
///
/// # Errors
///
/// Returns an error and leaves the level unchanged if `s` names no level.
pub fn set_level_from_str(s: &str) -> Result<(), String> {
    let level = Level::from_str(s)?;
    set_level(level);
    Ok(())
}

/// Restricts global output to targets starting with `prefix`.
pub fn set_target_filter(prefix: &str) {
    get_logger().set_target_filter(prefix);
}

/// Removes the global target filter.
pub fn clear_target_filter() {
    get_logger().clear_target_filter();
}

/// Applies the level named by `NEST_LOG`, if set.
///
/// Returns `Ok(Some(level))` when a level was applied and `Ok(None)` when the
/// variable is unset.
///
/// # Errors
///
/// Returns an error and leaves the level unchanged if the variable holds
/// something other than a level name.
pub fn init_from_env() -> Result<Option<Level>, String> {
    match std::env::var(ENV_VAR) {
        Ok(raw) => {
            let level = Level::from_str(&raw)?;
            set_level(level);
            Ok(Some(level))
        }
        Err(_) => Ok(None),
    }
}

#[doc(hidden)]
pub fn __log_with_target(level: Level, target: &str, args: Arguments) {
    static RESET: &str = "\x1b[0m";

    let logger = get_logger();
    if !logger.enabled(level) || !logger.target_enabled(target) {
        return;
    }

    let color = level.color_code();
    let level_str = level.as_str();

    let mut stderr = std::io::stderr().lock();
    let _ = writeln!(stderr, "{color}[{level_str}]{RESET} {target}: {args}");
}

/// Logs a record at an explicit level.
///
/// ```
/// use nest_log::{log, Level};
///
/// log!(level: Level::Info, "installed {} accessors", 2);
/// ```
#[macro_export]
macro_rules! log {
    (level: $level:expr, $($arg:tt)*) => {
        {
            if $crate::get_logger().enabled($level) {
                $crate::__log_with_target(
                    $level,
                    module_path!(),
                    format_args!($($arg)*)
                );
            }
        }
    };
}

/// Logs at [`Level::Error`].
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Error, $($arg)*)
    };
}

/// Logs at [`Level::Warn`].
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Warn, $($arg)*)
    };
}

/// Logs at [`Level::Info`].
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Info, $($arg)*)
    };
}

/// Logs at [`Level::Debug`].
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Debug, $($arg)*)
    };
}

/// Logs at [`Level::Trace`].
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Trace, $($arg)*)
    };
}
