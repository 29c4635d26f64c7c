//  ERRORS.rs
//    by Lut99
//
//  Created:
//    06 Feb 2023, 13:47:16
//  Last edited:
//    27 Mar 2023, 15:20:33
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines errors that occur in the `strata-exe` crate.
//

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};
use std::path::PathBuf;


/***** LIBRARY *****/
/// Defines errors that occur when parsing identifiers.
#[derive(Debug)]
pub enum IdError {
    /// Failed to parse the given string as an identifier of the given type.
    ParseError{ what: &'static str, raw: String, err: uuid::Error },
}

impl Display for IdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use IdError::*;
        match self {
            ParseError{ what, raw, err } => write!(f, "Failed to parse '{}' as a {}: {}", raw, what, err),
        }
    }
}

impl Error for IdError {}



/// Defines errors that occur when fetching bundle payloads from the file store.
#[derive(Debug)]
pub enum BundleError {
    /// The store has no payload under the given path.
    PayloadNotFound{ name: String },
    /// Failed to read the payload under the given path.
    PayloadReadError{ name: String, path: PathBuf, err: std::io::Error },
}

impl Display for BundleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use BundleError::*;
        match self {
            PayloadNotFound{ name }             => write!(f, "No bundle payload found under '{}'", name),
            PayloadReadError{ name, path, err } => write!(f, "Failed to read bundle payload '{}' from '{}': {}", name, path.display(), err),
        }
    }
}

impl Error for BundleError {}



/// Defines errors that occur while provisioning an application bundle.
#[derive(Debug)]
pub enum ProvisionError {
    /// Failed to remove a stale bundle directory.
    DirRemoveError{ path: PathBuf, err: std::io::Error },
    /// Failed to create the bundle directory.
    DirCreateError{ path: PathBuf, err: std::io::Error },
    /// Failed to canonicalize the bundle directory.
    DirCanonicalizeError{ path: PathBuf, err: std::io::Error },
    /// Failed to fetch the raw bundle payload from the file store.
    PayloadFetchError{ name: String, err: BundleError },

    /// Failed to get the entries of the bundle archive.
    EntriesError{ err: std::io::Error },
    /// Failed to get the next entry of the bundle archive.
    EntryError{ err: std::io::Error },
    /// Failed to get the path of an entry in the bundle archive.
    EntryPathError{ err: std::io::Error },
    /// An entry attempted to escape the bundle directory.
    PathTraversal{ entry: PathBuf },
    /// Failed to create the parent directory of an entry.
    EntryDirCreateError{ path: PathBuf, err: std::io::Error },
    /// Failed to unpack an entry of the bundle archive.
    EntryWriteError{ path: PathBuf, err: std::io::Error },

    /// Failed to create the sentinel file that marks the extraction as complete.
    FlagCreateError{ path: PathBuf, err: std::io::Error },
    /// Failed to write the executor driver script into the bundle directory.
    DriverWriteError{ path: PathBuf, err: std::io::Error },
}

impl Display for ProvisionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use ProvisionError::*;
        match self {
            DirRemoveError{ path, err }       => write!(f, "Failed to remove stale bundle directory '{}': {}", path.display(), err),
            DirCreateError{ path, err }       => write!(f, "Failed to create bundle directory '{}': {}", path.display(), err),
            DirCanonicalizeError{ path, err } => write!(f, "Failed to canonicalize bundle directory '{}': {}", path.display(), err),
            PayloadFetchError{ name, err }    => write!(f, "Failed to fetch bundle payload '{}': {}", name, err),

            EntriesError{ err }              => write!(f, "Failed to get entries of bundle archive: {}", err),
            EntryError{ err }                => write!(f, "Failed to get next entry of bundle archive: {}", err),
            EntryPathError{ err }            => write!(f, "Failed to get path of entry in bundle archive: {}", err),
            PathTraversal{ entry }           => write!(f, "Entry '{}' of bundle archive is outside of the bundle directory", entry.display()),
            EntryDirCreateError{ path, err } => write!(f, "Failed to create directory '{}' for entry of bundle archive: {}", path.display(), err),
            EntryWriteError{ path, err }     => write!(f, "Failed to unpack entry of bundle archive to '{}': {}", path.display(), err),

            FlagCreateError{ path, err }  => write!(f, "Failed to create extraction flag file '{}': {}", path.display(), err),
            DriverWriteError{ path, err } => write!(f, "Failed to write executor driver to '{}': {}", path.display(), err),
        }
    }
}

impl Error for ProvisionError {}



/// Defines errors that occur while building the execution environment of a bundle.
#[derive(Debug)]
pub enum EnvironmentError {
    /// No interpreter is configured for the version the bundle declares.
    UnsupportedVersion{ version: String },

    /// Failed to remove a stale virtual environment.
    StaleVenvRemoveError{ path: PathBuf, err: std::io::Error },
    /// Failed to spawn the interpreter to create the virtual environment.
    VenvSpawnError{ interpreter: PathBuf, err: std::io::Error },
    /// The virtual environment creation completed unsuccessfully.
    VenvFailure{ code: Option<i32>, stderr: String },
    /// No pip executable was found in the freshly created virtual environment.
    PipNotFound{ path: PathBuf },
    /// Failed to spawn pip to install the dependency manifest.
    PipSpawnError{ pip: PathBuf, err: std::io::Error },
    /// The dependency install completed unsuccessfully.
    PipFailure{ code: Option<i32>, stderr: String },
    /// Failed to create the sentinel file that marks the environment as complete.
    FlagCreateError{ path: PathBuf, err: std::io::Error },

    /// No Python executable was found in the virtual environment.
    InterpreterNotFound{ path: PathBuf },
}

impl Display for EnvironmentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use EnvironmentError::*;
        match self {
            UnsupportedVersion{ version } => write!(f, "The required Python version is not supported: {}", version),

            StaleVenvRemoveError{ path, err }   => write!(f, "Failed to remove stale virtual environment '{}': {}", path.display(), err),
            VenvSpawnError{ interpreter, err }  => write!(f, "Failed to spawn '{}' to create virtual environment: {}", interpreter.display(), err),
            VenvFailure{ code, stderr }         => write!(f, "Virtual environment creation failed with exit code {}:\n{}", code.map(|c| c.to_string()).unwrap_or_else(|| "?".into()), stderr),
            PipNotFound{ path }                 => write!(f, "Can't find pip in '{}'", path.display()),
            PipSpawnError{ pip, err }           => write!(f, "Failed to spawn '{}' to install dependencies: {}", pip.display(), err),
            PipFailure{ code, stderr }          => write!(f, "Dependency install failed with exit code {}:\n{}", code.map(|c| c.to_string()).unwrap_or_else(|| "?".into()), stderr),
            FlagCreateError{ path, err }        => write!(f, "Failed to create environment flag file '{}': {}", path.display(), err),

            InterpreterNotFound{ path } => write!(f, "Can't find a Python executable in '{}'", path.display()),
        }
    }
}

impl Error for EnvironmentError {}



/// Defines errors that occur in the per-bundle worker.
#[derive(Debug)]
pub enum WorkerError {
    /// Provisioning the bundle failed.
    ProvisionError{ err: ProvisionError },
    /// Building the execution environment failed.
    EnvironmentError{ err: EnvironmentError },
    /// The configured API address could not be turned into a URL.
    ApiUrlError{ raw: String, err: url::ParseError },

    /// Failed to launch the executor process.
    LaunchError{ bundle: String, err: std::io::Error },
    /// The executor process has no stdin to write to.
    StdinClosedError{ bundle: String },
    /// Failed to serialize an execution request.
    RequestSerializeError{ err: serde_json::Error },
    /// Failed to write an execution request to the executor process.
    WriteError{ bundle: String, err: std::io::Error },

    /// The worker's queue is gone (its supervising task has stopped).
    QueueClosedError{ bundle: String },
}

impl Display for WorkerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use WorkerError::*;
        match self {
            ProvisionError{ err }   => write!(f, "Failed to provision application bundle: {}", err),
            EnvironmentError{ err } => write!(f, "Failed to build execution environment: {}", err),
            ApiUrlError{ raw, err } => write!(f, "Failed to parse configured API address '{}' as a URL: {}", raw, err),

            LaunchError{ bundle, err }   => write!(f, "Failed to launch executor process for bundle '{}': {}", bundle, err),
            StdinClosedError{ bundle }   => write!(f, "Executor process for bundle '{}' has no stdin", bundle),
            RequestSerializeError{ err } => write!(f, "Failed to serialize execution request: {}", err),
            WriteError{ bundle, err }    => write!(f, "Failed to write execution request to executor process for bundle '{}': {}", bundle, err),

            QueueClosedError{ bundle } => write!(f, "Request queue for bundle '{}' is closed", bundle),
        }
    }
}

impl Error for WorkerError {}



/// Defines errors that occur in the execution state store.
#[derive(Debug)]
pub enum StoreError {
    /// Failed to create a stage directory.
    DirCreateError{ path: PathBuf, err: std::io::Error },
    /// An execution with the given identifier was already created.
    DuplicateExecution{ id: String },
    /// Failed to serialize an execution record.
    RecordSerializeError{ id: String, err: serde_json::Error },
    /// Failed to write an execution record to its temporary file.
    TempWriteError{ path: PathBuf, err: std::io::Error },
    /// Failed to move an execution record into place.
    FileMoveError{ from: PathBuf, to: PathBuf, err: std::io::Error },

    /// Failed to read an execution record file.
    FileReadError{ path: PathBuf, err: std::io::Error },
    /// Failed to parse an execution record file.
    RecordParseError{ path: PathBuf, err: serde_json::Error },

    /// Failed to write a meta index file.
    MetaWriteError{ path: PathBuf, err: std::io::Error },
    /// Failed to read a meta index file.
    MetaReadError{ path: PathBuf, err: std::io::Error },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use StoreError::*;
        match self {
            DirCreateError{ path, err }       => write!(f, "Failed to create stage directory '{}': {}", path.display(), err),
            DuplicateExecution{ id }          => write!(f, "An execution with id '{}' already exists", id),
            RecordSerializeError{ id, err }   => write!(f, "Failed to serialize record of execution '{}': {}", id, err),
            TempWriteError{ path, err }       => write!(f, "Failed to write execution record to temporary file '{}': {}", path.display(), err),
            FileMoveError{ from, to, err }    => write!(f, "Failed to move execution record '{}' to '{}': {}", from.display(), to.display(), err),

            FileReadError{ path, err }    => write!(f, "Failed to read execution record file '{}': {}", path.display(), err),
            RecordParseError{ path, err } => write!(f, "Failed to parse execution record file '{}': {}", path.display(), err),

            MetaWriteError{ path, err } => write!(f, "Failed to write execution meta file '{}': {}", path.display(), err),
            MetaReadError{ path, err }  => write!(f, "Failed to read execution meta file '{}': {}", path.display(), err),
        }
    }
}

impl Error for StoreError {}



/// Defines a kind of combination of all the possible errors that may occur in the engine's facade.
#[derive(Debug)]
pub enum ExecuteError {
    /// Something went wrong in the execution state store.
    StoreError{ err: StoreError },
    /// Something went wrong while submitting to the worker.
    SubmitError{ err: WorkerError },
}

impl Display for ExecuteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use ExecuteError::*;
        match self {
            StoreError{ err }  => write!(f, "Failed to access the execution state store: {}", err),
            SubmitError{ err } => write!(f, "Failed to submit execution request: {}", err),
        }
    }
}

impl Error for ExecuteError {}
