//  ERRORS.rs
//    by Lut99
//
//  Created:
//    06 Feb 2023, 11:28:31
//  Last edited:
//    14 Feb 2023, 16:44:02
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines errors that occur in the `strata-cfg` crate.
//

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};
use std::path::PathBuf;


/***** LIBRARY *****/
/// Errors that relate to loading and storing the engine configuration.
#[derive(Debug)]
pub enum EngineConfigError {
    /// Failed to open the given file.
    FileOpenError{ path: PathBuf, err: std::io::Error },
    /// Failed to read the given file.
    FileReadError{ path: PathBuf, err: std::io::Error },
    /// Failed to parse the given file as YAML.
    FileParseError{ path: PathBuf, err: serde_yaml::Error },

    /// Failed to create the given file.
    FileCreateError{ path: PathBuf, err: std::io::Error },
    /// Failed to write to the given file.
    FileWriteError{ path: PathBuf, err: std::io::Error },
    /// Failed to serialize the configuration.
    ConfigSerializeError{ err: serde_yaml::Error },
}

impl Display for EngineConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use EngineConfigError::*;
        match self {
            FileOpenError{ path, err }  => write!(f, "Failed to open engine config file '{}': {}", path.display(), err),
            FileReadError{ path, err }  => write!(f, "Failed to read engine config file '{}': {}", path.display(), err),
            FileParseError{ path, err } => write!(f, "Failed to parse engine config file '{}' as YAML: {}", path.display(), err),

            FileCreateError{ path, err } => write!(f, "Failed to create engine config file '{}': {}", path.display(), err),
            FileWriteError{ path, err }  => write!(f, "Failed to write to engine config file '{}': {}", path.display(), err),
            ConfigSerializeError{ err }  => write!(f, "Failed to serialize engine config: {}", err),
        }
    }
}

impl Error for EngineConfigError {}
