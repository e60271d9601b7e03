use crate::routing::DispatchMode;
use hocon::{Hocon, HoconLoader};
use std::{error::Error, fmt, marker::PhantomData, num::TryFromIntError, path::Path};

mod converters;
pub use converters::*;

/// Configuration keys for group dispatching.
///
/// All keys live under `groupcall.dispatch`, for example:
///
/// ```hocon
/// groupcall.dispatch {
///     mode = "dynamic"
///     buffer-size = 2
///     member-to-thread-ratio = 4
///     additional-threads = 3
/// }
/// ```
pub mod keys {
    use super::*;

    /// The assignment policy used when a call site does not override it.
    ///
    /// # Legal Values
    ///
    /// `unspecified`, `static-round-robin`, `static-random`, `dynamic`, `custom`
    ///
    /// # Default
    ///
    /// `unspecified`, which behaves like `static-round-robin`.
    pub const MODE: ConfigEntry<DispatchModeValue> = ConfigEntry {
        key: "groupcall.dispatch.mode",
        doc: "The assignment policy used when a call site does not override it.",
        value_type: PhantomData,
        default: || DispatchMode::Unspecified,
        validate: |_| true,
    };

    /// The number of buffered waves before remaining tasks are dispatched as overflow.
    ///
    /// # Default
    ///
    /// 1, i.e. at most one task per member before overflow.
    pub const BUFFER_SIZE: ConfigEntry<UsizeValue> = ConfigEntry {
        key: "groupcall.dispatch.buffer-size",
        doc: "The number of buffered waves before remaining tasks are dispatched as overflow.",
        value_type: PhantomData,
        default: || 1,
        validate: |_| true,
    };

    /// How many members share one pool thread.
    ///
    /// A value of 0 sizes the pool with the additional threads only.
    ///
    /// # Default
    ///
    /// 4
    pub const MEMBER_TO_THREAD_RATIO: ConfigEntry<UsizeValue> = ConfigEntry {
        key: "groupcall.dispatch.member-to-thread-ratio",
        doc: "How many members share one pool thread.",
        value_type: PhantomData,
        default: || 4,
        validate: |_| true,
    };

    /// Threads added on top of the member-proportional part of the pool.
    ///
    /// # Default
    ///
    /// 3
    pub const ADDITIONAL_THREADS: ConfigEntry<UsizeValue> = ConfigEntry {
        key: "groupcall.dispatch.additional-threads",
        doc: "Threads added on top of the member-proportional part of the pool.",
        value_type: PhantomData,
        default: || 3,
        validate: |_| true,
    };
}

const PATH_SEP: char = '.';

/// Description of a configuration parameter that can be set via HOCON config.
pub struct ConfigEntry<T>
where
    T: ConfigValueType,
{
    /// The full, dot-separated key to read this config value from a HOCON config.
    pub key: &'static str,
    /// Documentation for this config entry.
    pub doc: &'static str,
    /// Type information of this config value.
    pub value_type: PhantomData<T>,
    /// The default value for this config entry.
    ///
    /// Used if no value is specified in the Hocon config.
    pub default: fn() -> T::Value,
    /// Checks whether a value read from a config is legal.
    pub validate: fn(&T::Value) -> bool,
}

impl<T> ConfigEntry<T>
where
    T: ConfigValueType,
{
    /// Returns all the path segments for this key, root first.
    pub fn path_segments(&self) -> Vec<&'static str> {
        self.key.split(PATH_SEP).collect()
    }

    /// Select the entry corresponding to this key from the given config.
    pub fn select<'a>(&self, conf: &'a Hocon) -> &'a Hocon {
        self.path_segments()
            .into_iter()
            .fold(conf, |hocon, segment| &hocon[segment])
    }

    /// Read the value for this key from the given config, falling back to the default if it is absent.
    pub fn read(&self, conf: &Hocon) -> Result<T::Value, ConfigError> {
        let value = match self.select(conf) {
            Hocon::BadValue(_) | Hocon::Null => (self.default)(),
            hocon => T::from_conf(hocon)?,
        };
        if (self.validate)(&value) {
            Ok(value)
        } else {
            Err(ConfigError::ValidationError(format!(
                "Illegal value for key {}",
                self.key
            )))
        }
    }
}

/// A value extractor for config values
pub trait ConfigValueType {
    /// The type of the value extracted by this type.
    type Value;

    /// Extract the value from a config instance.
    fn from_conf(conf: &Hocon) -> Result<Self::Value, ConfigError>;

    /// Convert the value into a string that can be used in a HOCON config.
    fn config_string(value: Self::Value) -> String;
}

/// Group-level dispatch defaults
///
/// Every group reference owns one of these. Individual call sites can
/// override parts of it with a [DispatchOverride](DispatchOverride).
///
/// # Example
///
/// ```
/// use groupcall::prelude::*;
///
/// let conf = DispatchConfig::load_config_str(
///     r#"groupcall.dispatch { mode = "dynamic", buffer-size = 2 }"#,
/// )
/// .expect("config");
/// assert_eq!(DispatchMode::Dynamic, conf.mode());
/// assert_eq!(2, conf.buffer_size());
/// assert_eq!(4, conf.member_to_thread_ratio());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct DispatchConfig {
    mode: DispatchMode,
    buffer_size: usize,
    member_to_thread_ratio: usize,
    additional_threads: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            mode: (keys::MODE.default)(),
            buffer_size: (keys::BUFFER_SIZE.default)(),
            member_to_thread_ratio: (keys::MEMBER_TO_THREAD_RATIO.default)(),
            additional_threads: (keys::ADDITIONAL_THREADS.default)(),
        }
    }
}

impl DispatchConfig {
    /// Read a config from a parsed HOCON tree, using defaults for absent keys.
    pub fn from_hocon(conf: &Hocon) -> Result<Self, ConfigError> {
        Ok(DispatchConfig {
            mode: keys::MODE.read(conf)?,
            buffer_size: keys::BUFFER_SIZE.read(conf)?,
            member_to_thread_ratio: keys::MEMBER_TO_THREAD_RATIO.read(conf)?,
            additional_threads: keys::ADDITIONAL_THREADS.read(conf)?,
        })
    }

    /// Parse `config` as HOCON and read a config from it.
    pub fn load_config_str<S>(config: S) -> Result<Self, ConfigError>
    where
        S: AsRef<str>,
    {
        let hocon = HoconLoader::new().load_str(config.as_ref())?.hocon()?;
        Self::from_hocon(&hocon)
    }

    /// Load the HOCON file at `path` and read a config from it.
    pub fn load_config_file<P>(path: P) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
    {
        let hocon = HoconLoader::new().load_file(path.as_ref())?.hocon()?;
        Self::from_hocon(&hocon)
    }

    /// The default assignment policy
    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Set the default assignment policy
    pub fn set_mode(&mut self, mode: DispatchMode) -> &mut Self {
        self.mode = mode;
        self
    }

    /// The default number of buffered waves
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Set the default number of buffered waves
    pub fn set_buffer_size(&mut self, buffer_size: usize) -> &mut Self {
        self.buffer_size = buffer_size;
        self
    }

    /// The number of members per pool thread
    pub fn member_to_thread_ratio(&self) -> usize {
        self.member_to_thread_ratio
    }

    /// Set the number of members per pool thread
    pub fn set_member_to_thread_ratio(&mut self, ratio: usize) -> &mut Self {
        self.member_to_thread_ratio = ratio;
        self
    }

    /// The number of threads added on top of the member-proportional part
    pub fn additional_threads(&self) -> usize {
        self.additional_threads
    }

    /// Set the number of threads added on top of the member-proportional part
    pub fn set_additional_threads(&mut self, threads: usize) -> &mut Self {
        self.additional_threads = threads;
        self
    }

    /// Combine these defaults with an optional call-site override.
    pub fn resolve(&self, call_site: Option<&DispatchOverride>) -> DispatchSettings {
        let call_site = call_site.copied().unwrap_or_default();
        let mode = call_site.mode.unwrap_or(self.mode);
        DispatchSettings {
            mode,
            buffer_size: call_site.buffer_size.unwrap_or(self.buffer_size),
            member_to_thread_ratio: call_site
                .member_to_thread_ratio
                .unwrap_or(self.member_to_thread_ratio),
            additional_threads: call_site
                .additional_threads
                .unwrap_or(self.additional_threads),
            dynamically_reassignable: call_site
                .dynamically_reassignable
                .unwrap_or_else(|| mode == DispatchMode::Dynamic),
        }
    }
}

/// Per-call-site dispatch options
///
/// Every field that is left unset falls back to the group's [DispatchConfig](DispatchConfig).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct DispatchOverride {
    /// The assignment policy for this call
    pub mode: Option<DispatchMode>,
    /// The number of buffered waves for this call
    pub buffer_size: Option<usize>,
    /// Members per pool thread for this call
    pub member_to_thread_ratio: Option<usize>,
    /// Additional pool threads for this call
    pub additional_threads: Option<usize>,
    /// Whether overflow tasks may pick their target at execution time.
    ///
    /// Defaults to `true` exactly when the resolved mode is [Dynamic](DispatchMode::Dynamic).
    pub dynamically_reassignable: Option<bool>,
}

impl DispatchOverride {
    /// An override that only sets the mode and buffer size
    pub fn with_mode(mode: DispatchMode, buffer_size: usize) -> Self {
        DispatchOverride {
            mode: Some(mode),
            buffer_size: Some(buffer_size),
            ..Default::default()
        }
    }
}

/// Fully resolved dispatch options for a single group call
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct DispatchSettings {
    /// The assignment policy
    pub mode: DispatchMode,
    /// The number of buffered waves
    pub buffer_size: usize,
    /// Members per pool thread
    pub member_to_thread_ratio: usize,
    /// Additional pool threads
    pub additional_threads: usize,
    /// Whether overflow tasks may pick their target at execution time
    pub dynamically_reassignable: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        DispatchConfig::default().resolve(None)
    }
}

/// Errors that occur during config lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Type conversion failed.
    ConversionError(String),
    /// A value was read, but is not legal for its key.
    ValidationError(String),
    /// Loading or path traversal failed.
    PathError(hocon::Error),
}
impl ConfigError {
    fn expected<T>(conf: &Hocon) -> Self {
        let descr = format!(
            "Expected {} config value, but got {:?}",
            std::any::type_name::<T>(),
            conf
        );
        ConfigError::ConversionError(descr)
    }
}
impl From<hocon::Error> for ConfigError {
    fn from(error: hocon::Error) -> Self {
        ConfigError::PathError(error)
    }
}
impl From<TryFromIntError> for ConfigError {
    fn from(error: TryFromIntError) -> Self {
        ConfigError::ConversionError(error.to_string())
    }
}
impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ConversionError(description) => {
                write!(f, "Error during type conversion: {}", description)
            }
            ConfigError::ValidationError(description) => {
                write!(f, "Error during validation: {}", description)
            }
            ConfigError::PathError(error) => write!(f, "Error during path traversal: {}", error),
        }
    }
}
impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::ConversionError(_) | ConfigError::ValidationError(_) => None,
            ConfigError::PathError(error) => Some(error),
        }
    }
}
