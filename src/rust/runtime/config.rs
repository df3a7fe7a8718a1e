// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    pal::arch::CPU_DATA_CACHE_LINE_SIZE,
    runtime::{
        fail::Fail,
        memory::Backend,
    },
};
use ::std::{
    fs,
    ops::Index,
    str::FromStr,
};
use ::yaml_rust::{
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Constants
//======================================================================================================================

// Memory buffer options.
mod memory_config {
    pub const SECTION_NAME: &str = "memory";
    // Backend used by buffers that are allocated without naming one.
    pub const DEFAULT_BACKEND: &str = "default_backend";
    // Zero-fill newly allocated memory.
    pub const ZERO_INIT: &str = "zero_init";
    // Alignment of aligned heap buffers.
    pub const ALIGNMENT: &str = "alignment";
    // Allocations smaller than this are never reported to the pressure sink.
    pub const PRESSURE_THRESHOLD: &str = "pressure_threshold";
}

/// Prefix of environment variables that override configuration options.
const ENV_PREFIX: &str = "MEMHANDLE_";

//======================================================================================================================
// Structures
//======================================================================================================================

/// Memory handle configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Yaml);

/// Typed view of the options that drive a [crate::MemoryBuffer].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferOptions {
    /// Backend used by [crate::MemoryBuffer::allocate_default].
    pub default_backend: Backend,
    /// Zero-fill memory allocated by [crate::MemoryBuffer::allocate_default].
    pub zero_init: bool,
    /// Alignment of [Backend::AlignedHeap] buffers allocated without an explicit alignment.
    pub alignment: usize,
    /// Allocations smaller than this many bytes are not reported to the pressure sink.
    pub pressure_threshold: usize,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Config {
    /// Reads a configuration file into a [Config] object.
    pub fn new(config_path: String) -> Result<Self, Fail> {
        let config_s: String = match fs::read_to_string(&config_path) {
            Ok(config_s) => config_s,
            Err(e) => {
                let cause: String = format!("failed to read configuration file (path={:?}): {:?}", config_path, e);
                error!("new(): {}", cause);
                return Err(e.into());
            },
        };
        Self::from_yaml_str(&config_s)
    }

    /// Parses a configuration document.
    pub fn from_yaml_str(config_s: &str) -> Result<Self, Fail> {
        let config: Vec<Yaml> = YamlLoader::load_from_str(config_s)?;
        let config_obj: &Yaml = match &config[..] {
            [c] => c,
            _ => return Err(Fail::new(libc::EINVAL, "Wrong number of config objects")),
        };

        Ok(Self(config_obj.clone()))
    }

    fn get_memory_config(&self) -> Result<&Yaml, Fail> {
        Self::get_subsection(&self.0, memory_config::SECTION_NAME)
    }

    /// Reads the "default backend" parameter from the environment variable first and then the underlying
    /// configuration file.
    pub fn default_backend(&self) -> Result<Backend, Fail> {
        if let Some(backend) = Self::get_typed_env_option(memory_config::DEFAULT_BACKEND)? {
            return Ok(backend);
        }
        Self::get_typed_str_option(
            self.get_memory_config()?,
            memory_config::DEFAULT_BACKEND,
            |val: &str| match val.parse() {
                Ok(backend) => Some(backend),
                Err(e) => {
                    error!("default_backend(): {:?}", e);
                    None
                },
            },
        )
    }

    /// Reads the "zero init" parameter from the environment variable first and then the underlying configuration
    /// file.
    pub fn zero_init(&self) -> Result<bool, Fail> {
        if let Some(zero_init) = Self::get_typed_env_option(memory_config::ZERO_INIT)? {
            Ok(zero_init)
        } else {
            Self::get_bool_option(self.get_memory_config()?, memory_config::ZERO_INIT)
        }
    }

    /// Reads the "alignment" parameter. The value must be a power of two.
    pub fn alignment(&self) -> Result<usize, Fail> {
        let alignment: usize = if let Some(alignment) = Self::get_typed_env_option(memory_config::ALIGNMENT)? {
            alignment
        } else {
            Self::get_int_option(self.get_memory_config()?, memory_config::ALIGNMENT)?
        };

        if !alignment.is_power_of_two() {
            let cause: String = format!("alignment must be a power of two (alignment={})", alignment);
            error!("alignment(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        Ok(alignment)
    }

    /// Reads the "pressure threshold" parameter.
    pub fn pressure_threshold(&self) -> Result<usize, Fail> {
        if let Some(threshold) = Self::get_typed_env_option(memory_config::PRESSURE_THRESHOLD)? {
            Ok(threshold)
        } else {
            Self::get_int_option(self.get_memory_config()?, memory_config::PRESSURE_THRESHOLD)
        }
    }

    /// Reads all buffer options. Options that are missing from both the environment and the configuration file keep
    /// their default value; options that are present but malformed are reported as errors.
    pub fn buffer_options(&self) -> Result<BufferOptions, Fail> {
        let defaults: BufferOptions = BufferOptions::default();
        Ok(BufferOptions {
            default_backend: Self::or_default(self.default_backend(), defaults.default_backend)?,
            zero_init: Self::or_default(self.zero_init(), defaults.zero_init)?,
            alignment: Self::or_default(self.alignment(), defaults.alignment)?,
            pressure_threshold: Self::or_default(self.pressure_threshold(), defaults.pressure_threshold)?,
        })
    }

    //======================================================================================================================
    // Static Functions
    //======================================================================================================================

    /// Falls back to `default` when an option is missing.
    fn or_default<T>(result: Result<T, Fail>, default: T) -> Result<T, Fail> {
        match result {
            Err(e) if e.errno == libc::ENOENT => Ok(default),
            result => result,
        }
    }

    /// Similar to `require_typed_option` using `Yaml::as_hash` receiver. This method returns a `&Yaml` instead of
    /// yaml::Hash, and Yaml is more natural for indexing.
    fn get_subsection<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        let section: &'a Yaml = Self::get_option(yaml, index)?;
        match section {
            Yaml::Hash(_) => Ok(section),
            _ => {
                let message: String = format!("parameter \"{}\" has unexpected type", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
        }
    }

    /// Index `yaml` to find the value at `index`, validating that the index exists.
    fn get_option<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        match yaml.index(index) {
            Yaml::BadValue => {
                let message: String = format!("missing configuration option \"{}\"", index);
                Err(Fail::new(libc::ENOENT, message.as_str()))
            },
            value => Ok(value),
        }
    }

    /// Index `yaml` to find the value at `index`, validating that it exists and that the receiver returns Some(_).
    fn get_typed_option<'a, T, Fn>(yaml: &'a Yaml, index: &str, receiver: Fn) -> Result<T, Fail>
    where
        Fn: FnOnce(&'a Yaml) -> Option<T>,
    {
        let option: &'a Yaml = Self::get_option(yaml, index)?;
        match receiver(option) {
            Some(value) => Ok(value),
            None => {
                let message: String = format!("parameter {} has unexpected type", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
        }
    }

    /// Index `yaml` to find value at `index`, validating it as a string.
    fn get_typed_str_option<T, Fn>(yaml: &Yaml, index: &str, parser: Fn) -> Result<T, Fail>
    where
        Fn: FnOnce(&str) -> Option<T>,
    {
        let option: &Yaml = Self::get_option(yaml, index)?;
        if let Some(value) = option.as_str() {
            if let Some(value) = parser(value) {
                return Ok(value);
            }
        }
        let message: String = format!("parameter {} has unexpected type", index);
        Err(Fail::new(libc::EINVAL, message.as_str()))
    }

    /// Get value where the environment value overrides the config file if it exists.
    fn get_typed_env_option<T: FromStr>(index: &str) -> Result<Option<T>, Fail> {
        // Check for the environment variable.
        if let Ok(var) = ::std::env::var(format!("{}{}", ENV_PREFIX, index.to_uppercase())) {
            if let Ok(value) = var.as_str().parse() {
                return Ok(Some(value));
            } else {
                let message: String = format!("parameter {} has unexpected type", index);
                return Err(Fail::new(libc::EINVAL, message.as_str()));
            }
        }
        Ok(None)
    }

    /// Similar to `require_typed_option` using `Yaml::as_i64` as the receiver, but additionally verifies that the
    /// destination type may hold the i64 value.
    fn get_int_option<T: TryFrom<i64>>(yaml: &Yaml, index: &str) -> Result<T, Fail> {
        let val: i64 = Self::get_typed_option(yaml, index, &Yaml::as_i64)?;
        match T::try_from(val) {
            Ok(val) => Ok(val),
            _ => {
                let message: String = format!("parameter \"{}\" is out of range", index);
                Err(Fail::new(libc::ERANGE, message.as_str()))
            },
        }
    }

    /// Same as `Self::require_typed_option` using `Yaml::as_bool` as the receiver.
    fn get_bool_option(yaml: &Yaml, index: &str) -> Result<bool, Fail> {
        Self::get_typed_option(yaml, index, &Yaml::as_bool)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            default_backend: Backend::Heap,
            zero_init: false,
            alignment: CPU_DATA_CACHE_LINE_SIZE,
            pressure_threshold: 0,
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
