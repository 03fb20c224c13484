// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{
    fmt,
    fs::File,
    io::{Read, Write},
    path::Path,
};

/// Reasons a configuration could not be loaded or saved.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    Invalid,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "config io error, {}", err),
            ConfigError::Yaml(err) => write!(f, "config yaml error, {}", err),
            ConfigError::Invalid => write!(f, "config is not valid"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

/// A trait that handles the loading / saving and validity of configuration information.
pub trait Config: serde::Serialize {
    fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if !self.is_valid() {
            error!("Config isn't valid and won't be saved");
            return Err(ConfigError::Invalid);
        }
        let s = serde_yaml::to_string(&self)?;
        let mut f = File::create(path).map_err(|err| {
            error!("Cannot create the path {} to save the config", path.display());
            err
        })?;
        f.write_all(s.as_bytes())?;
        Ok(())
    }

    fn load<A>(path: &Path) -> Result<A, ConfigError>
    where
        for<'de> A: Config + serde::Deserialize<'de>,
    {
        let mut f = File::open(path).map_err(|err| {
            error!("Cannot open configuration file {}", path.display());
            err
        })?;
        let mut s = String::new();
        f.read_to_string(&mut s)?;
        let config: A = serde_yaml::from_str(&s).map_err(|err| {
            error!(
                "Cannot deserialize configuration from {}, error reason: {}",
                path.display(),
                err
            );
            err
        })?;
        if config.is_valid() {
            Ok(config)
        } else {
            error!("Configuration in {} is not valid", path.display());
            Err(ConfigError::Invalid)
        }
    }

    fn is_valid(&self) -> bool;
}
