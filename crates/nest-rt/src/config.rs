//! Runtime configuration.

use nest_log::Level;

/// Longest launch task prefix accepted by default, in bytes.
pub const DEFAULT_PREFIX_LIMIT: usize = 255;

/// Prefix of class methods run by the default launch task.
pub const DEFAULT_LAUNCH_TASK_PREFIX: &str = "_LaunchTask_";

/// Prefix of class methods declaring self-aware swizzles.
pub const SELF_AWARE_SWIZZLE_PREFIX: &str = "_ObjCSelfAwareSwizzle_";

/// Entry point the launch performer is injected into.
pub const ENTRY_POINT_SELECTOR: &str = "application:willFinishLaunchingWithOptions:";

/// Settings for a [`Runtime`](crate::Runtime).
///
/// # Example
///
/// ```rust
/// use nest_rt::RuntimeConfig;
///
/// let config = RuntimeConfig::default()
///     .with_default_accessors(false)
///     .with_entry_point_selector("applicationDidFinishLaunching:");
///
/// assert!(!config.install_default_accessors);
/// assert_eq!(config.launch_task_prefix_limit, 255);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub launch_task_prefix_limit: usize,
    /// Prefix of the default launch task; `None` registers no default task.
    pub default_launch_task_prefix: Option<String>,
    /// Prefix of the swizzle launch task; `None` registers no swizzle task.
    pub self_aware_swizzle_prefix: Option<String>,
    pub entry_point_selector: String,
    /// Register the default accessor bodies on construction.
    pub install_default_accessors: bool,
    /// Level applied to the global logger on construction.
    pub log_level: Option<Level>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            launch_task_prefix_limit: DEFAULT_PREFIX_LIMIT,
            default_launch_task_prefix: Some(DEFAULT_LAUNCH_TASK_PREFIX.to_string()),
            self_aware_swizzle_prefix: Some(SELF_AWARE_SWIZZLE_PREFIX.to_string()),
            entry_point_selector: ENTRY_POINT_SELECTOR.to_string(),
            install_default_accessors: true,
            log_level: None,
        }
    }
}

impl RuntimeConfig {
    /// Default settings with the log level taken from `NEST_LOG`.
    ///
    /// An unparsable value is reported on stderr and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let log_level = match nest_log::init_from_env() {
            Ok(level) => level,
            Err(err) => {
                nest_log::warn!("ignoring {}: {err}", nest_log::ENV_VAR);
                None
            }
        };
        RuntimeConfig {
            log_level,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_prefix_limit(mut self, limit: usize) -> Self {
        self.launch_task_prefix_limit = limit;
        self
    }

    #[must_use]
    pub fn with_default_launch_task_prefix(mut self, prefix: Option<&str>) -> Self {
        self.default_launch_task_prefix = prefix.map(str::to_string);
        self
    }

    #[must_use]
    pub fn with_self_aware_swizzle_prefix(mut self, prefix: Option<&str>) -> Self {
        self.self_aware_swizzle_prefix = prefix.map(str::to_string);
        self
    }

    #[must_use]
    pub fn with_entry_point_selector(mut self, selector: &str) -> Self {
        self.entry_point_selector = selector.to_string();
        self
    }

    #[must_use]
    pub fn with_default_accessors(mut self, install: bool) -> Self {
        self.install_default_accessors = install;
        self
    }

    #[must_use]
    pub fn with_log_level(mut self, level: Level) -> Self {
        self.log_level = Some(level);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.launch_task_prefix_limit, 255);
        assert_eq!(
            config.default_launch_task_prefix.as_deref(),
            Some("_LaunchTask_")
        );
        assert_eq!(
            config.self_aware_swizzle_prefix.as_deref(),
            Some("_ObjCSelfAwareSwizzle_")
        );
        assert_eq!(
            config.entry_point_selector,
            "application:willFinishLaunchingWithOptions:"
        );
        assert!(config.install_default_accessors);
        assert_eq!(config.log_level, None);
    }

    #[test]
    fn test_builder() {
        let config = RuntimeConfig::default()
            .with_prefix_limit(16)
            .with_default_launch_task_prefix(None)
            .with_log_level(Level::Trace);
        assert_eq!(config.launch_task_prefix_limit, 16);
        assert!(config.default_launch_task_prefix.is_none());
        assert_eq!(config.log_level, Some(Level::Trace));
    }
}
