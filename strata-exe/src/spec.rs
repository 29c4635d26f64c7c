//  SPEC.rs
//    by Lut99
//
//  Created:
//    06 Feb 2023, 14:02:37
//  Last edited:
//    27 Mar 2023, 15:31:44
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines (public) interfaces and structs for the `strata-exe` crate.
//

use std::fmt::{Display, Formatter, Result as FResult};
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use strata_shr::debug::EnumDebug;

use crate::errors::{BundleError, IdError};


/***** TESTS *****/





/***** LIBRARY *****/
/// Defines an execution identifier, which correlates a submitted request with its status records.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ExecId(Uuid);

impl ExecId {
    /// Generate a new ExecId.
    ///
    /// # Returns
    /// A new instance of a ExecId that is practically unique.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl From<&ExecId> for ExecId {
    #[inline]
    fn from(value: &ExecId) -> Self {
        value.clone()
    }
}
impl AsRef<ExecId> for ExecId {
    #[inline]
    fn as_ref(&self) -> &ExecId {
        self
    }
}

impl From<ExecId> for String {
    #[inline]
    fn from(value: ExecId) -> Self {
        Self::from(&value)
    }
}
impl From<&ExecId> for String {
    #[inline]
    fn from(value: &ExecId) -> Self {
        value.0.to_string()
    }
}
impl Display for ExecId {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExecId {
    type Err = IdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match Uuid::from_str(value) {
            Ok(uuid) => Ok(Self(uuid)),
            Err(err) => Err(IdError::ParseError{ what: "ExecId", raw: value.into(), err }),
        }
    }
}



/// Defines what an execution request asks the application to do.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    /// Recompute the views and, if the flag is true, apply the user's function to them.
    Apply(bool),
    /// Deliver a UI event to the application.
    Event(Value),
}

impl EnumDebug for RequestKind {
    #[inline]
    fn fmt_name(&self, f: &mut Formatter<'_>) -> FResult {
        use RequestKind::*;
        match self {
            Apply(_) => write!(f, "Apply"),
            Event(_) => write!(f, "Event"),
        }
    }
}



/// Defines a unit of work as submitted to a worker's queue and written to the executor's stdin.
///
/// The wire format is one JSON object per line, newline-terminated.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ExecutionRequest {
    /// The identifier that correlates this request with its status records.
    pub id    : String,
    /// The form inputs the caller submitted, if any.
    pub views : Option<Vec<Value>>,
    /// What the application is asked to do.
    #[serde(flatten)]
    pub kind  : RequestKind,
}

impl ExecutionRequest {
    /// Constructor for the ExecutionRequest.
    ///
    /// # Arguments
    /// - `id`: The identifier that correlates this request with its status records.
    /// - `views`: The form inputs the caller submitted, if any.
    /// - `kind`: What the application is asked to do.
    ///
    /// # Returns
    /// A new ExecutionRequest instance.
    #[inline]
    pub fn new(id: impl Into<String>, views: Option<Vec<Value>>, kind: RequestKind) -> Self {
        Self {
            id : id.into(),
            views,
            kind,
        }
    }
}



/// Defines the seam to the external file store that holds raw bundle payloads.
#[async_trait::async_trait]
pub trait BundleStore: Send + Sync {
    /// Fetches the raw bytes of the bundle payload under the given path.
    ///
    /// # Arguments
    /// - `file_path`: The stable path of the payload within the store.
    ///
    /// # Returns
    /// The raw (compressed) archive bytes.
    ///
    /// # Errors
    /// This function errors if no payload lives under the given path, or it could not be read.
    async fn get(&self, file_path: &str) -> Result<Vec<u8>, BundleError>;
}



/// Defines a BundleStore that reads payloads from a local directory.
#[derive(Clone, Debug)]
pub struct LocalBundleStore {
    /// The directory the payloads live in.
    root : PathBuf,
}

impl LocalBundleStore {
    /// Constructor for the LocalBundleStore.
    ///
    /// # Arguments
    /// - `root`: The directory the payloads live in.
    ///
    /// # Returns
    /// A new LocalBundleStore instance.
    #[inline]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root : root.into(),
        }
    }
}

#[async_trait::async_trait]
impl BundleStore for LocalBundleStore {
    async fn get(&self, file_path: &str) -> Result<Vec<u8>, BundleError> {
        let path: PathBuf = self.root.join(file_path);
        if !path.exists() { return Err(BundleError::PayloadNotFound{ name: file_path.into() }); }
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err)  => Err(BundleError::PayloadReadError{ name: file_path.into(), path, err }),
        }
    }
}
