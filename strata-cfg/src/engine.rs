//  ENGINE.rs
//    by Lut99
//
//  Created:
//    06 Feb 2023, 11:32:09
//  Last edited:
//    27 Mar 2023, 14:21:55
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the `engine.yml` file that describes the environment of the
//!   local execution engine - where applications are unpacked, where
//!   execution records live and which Python runtimes are available.
//

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use crate::errors::EngineConfigError as Error;


/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;

    /// The config roundtrips through its YAML file representation.
    #[test]
    fn config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path: PathBuf = dir.path().join("engine.yml");

        let mut config: EngineConfig = EngineConfig::default();
        config.runtimes.insert("3.8".into(), "/usr/bin/python3.8".into());
        config.to_path(&path).unwrap();

        let parsed: EngineConfig = EngineConfig::from_path(&path).unwrap();
        assert_eq!(parsed.runtimes.get("3.8"), Some(&PathBuf::from("/usr/bin/python3.8")));
        assert_eq!(parsed.paths.executions, config.paths.executions);
    }

    /// Port 80 is elided from the API address, any other port is not.
    #[test]
    fn api_address_port_elision() {
        let api: ApiConfig = ApiConfig{ host: "localhost".into(), port: 80 };
        assert_eq!(api.address(), "localhost");

        let api: ApiConfig = ApiConfig::default();
        assert_eq!(api.address(), "localhost:8080");
    }
}





/***** LIBRARY *****/
/// Defines the `engine.yml` file that describes the environment of the local execution engine.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Defines the paths configuration for the engine.
    pub paths    : EnginePaths,
    /// Maps minor Python versions (e.g., `3.8`) to the interpreter executable to use for them.
    pub runtimes : HashMap<String, PathBuf>,
    /// Defines where the executor process may reach back into the server.
    pub api      : ApiConfig,
}

impl EngineConfig {
    /// Constructor for the EngineConfig that reads it from the given path.
    ///
    /// # Arguments
    /// - `path`: The path to read the EngineConfig from.
    ///
    /// # Returns
    /// A new EngineConfig instance with the contents defined in the file.
    ///
    /// # Errors
    /// This function errors if the given file cannot be read or has an invalid format.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path: &Path = path.as_ref();

        // Get the raw file to parse
        let mut raw: String = String::new();
        {
            // Open the file
            let mut handle: File = match File::open(path) {
                Ok(handle) => handle,
                Err(err)   => { return Err(Error::FileOpenError { path: path.into(), err }); },
            };

            // Read the file
            if let Err(err) = handle.read_to_string(&mut raw) { return Err(Error::FileReadError { path: path.into(), err }); }
        }

        // Parse with serde
        match serde_yaml::from_str(&raw) {
            Ok(config) => Ok(config),
            Err(err)   => Err(Error::FileParseError { path: path.into(), err }),
        }
    }

    /// Writes the EngineConfig to the given path.
    ///
    /// # Arguments
    /// - `path`: The path to write the EngineConfig to.
    ///
    /// # Returns
    /// Nothing, but does obviously create a new file with this EngineConfig's contents.
    ///
    /// # Errors
    /// This function errors if the given file cannot be written or we failed to serialize ourselves.
    pub fn to_path(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path: &Path = path.as_ref();

        // Serialize the config
        let config: String = match serde_yaml::to_string(self) {
            Ok(config) => config,
            Err(err)   => { return Err(Error::ConfigSerializeError{ err }); },
        };

        // Write it
        {
            // Create the file
            let mut handle: File = match File::create(path) {
                Ok(handle) => handle,
                Err(err)   => { return Err(Error::FileCreateError { path: path.into(), err }); },
            };

            // Write the serialized config
            if let Err(err) = handle.write_all(config.as_bytes()) { return Err(Error::FileWriteError { path: path.into(), err }); }
        }

        // Done
        Ok(())
    }



    /// Returns the configured interpreter executable for the given minor Python version.
    ///
    /// # Arguments
    /// - `version`: The minor version (e.g., `3.8`) to look up.
    ///
    /// # Returns
    /// The path of the interpreter, or `None` if no runtime is configured for that version.
    #[inline]
    pub fn runtime(&self, version: impl AsRef<str>) -> Option<&PathBuf> {
        self.runtimes.get(version.as_ref())
    }
}

impl Default for EngineConfig {
    #[inline]
    fn default() -> Self {
        Self {
            paths    : EnginePaths::default(),
            runtimes : HashMap::new(),
            api      : ApiConfig::default(),
        }
    }
}



/// Defines where the engine keeps its various directories.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EnginePaths {
    /// The directory where application bundles are unpacked (one subdirectory per bundle path).
    pub applications : PathBuf,
    /// The directory where execution records live (one subdirectory per stage).
    pub executions   : PathBuf,
    /// The directory of the local file store that holds the raw bundle payloads.
    pub files        : PathBuf,
}
impl Default for EnginePaths {
    #[inline]
    fn default() -> Self {
        Self {
            applications : "./applications".into(),
            executions   : "./executions".into(),
            files        : "./files".into(),
        }
    }
}



/// Defines where the executor process may reach back into the server.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ApiConfig {
    /// The host the server is reachable on from the executor's point of view.
    pub host : String,
    /// The port the server listens on internally.
    pub port : u16,
}
impl ApiConfig {
    /// Returns the address the executor process should call back into, without schema.
    ///
    /// # Returns
    /// The address as a string, omitting the port if it is the default HTTP port.
    pub fn address(&self) -> String {
        format!("{}{}", self.host, if self.port != 80 { format!(":{}", self.port) } else { String::new() })
    }
}
impl Default for ApiConfig {
    #[inline]
    fn default() -> Self {
        Self {
            host : "localhost".into(),
            port : 8080,
        }
    }
}
