//  EXECUTION.rs
//    by Lut99
//
//  Created:
//    06 Feb 2023, 10:31:57
//  Last edited:
//    27 Mar 2023, 14:08:46
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the model types around executions: the durability stages an
//!   execution record moves through, its externally visible status and
//!   the record itself.
//

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;


/***** TESTS *****/





/***** ERRORS *****/
/// Defines errors that occur when parsing Stages from strings.
#[derive(Debug)]
pub enum StageParseError {
    /// The given string did not name a known stage.
    UnknownStage{ raw: String },
}

impl Display for StageParseError {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use StageParseError::*;
        match self {
            UnknownStage{ raw } => write!(f, "Unknown execution stage '{}'", raw),
        }
    }
}

impl Error for StageParseError {}





/***** LIBRARY *****/
/// Defines the durability stages an execution record moves through.
///
/// Each stage is a separate checkpoint on disk; the most advanced stage that exists is
/// authoritative for a given execution.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Stage {
    /// The record as written at submission time.
    Staged,
    /// The record as updated by the running executor process.
    Running,
    /// The terminal record.
    Finished,
}

impl Stage {
    /// The stages in the order `poll` consults them, i.e., most advanced first.
    pub const PRIORITY: [Self; 3] = [ Self::Finished, Self::Running, Self::Staged ];

    /// Returns the name of the directory this stage's records live in.
    #[inline]
    pub fn dirname(&self) -> &'static str {
        use Stage::*;
        match self {
            Staged   => "staged",
            Running  => "running",
            Finished => "finished",
        }
    }
}

impl Display for Stage {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        write!(f, "{}", self.dirname())
    }
}

impl FromStr for Stage {
    type Err = StageParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staged"   => Ok(Self::Staged),
            "running"  => Ok(Self::Running),
            "finished" => Ok(Self::Finished),

            raw => Err(StageParseError::UnknownStage{ raw: raw.into() }),
        }
    }
}



/// Defines the externally visible status of an execution.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Accepted and queued, but not picked up by the executor process yet.
    Scheduled,
    /// Being executed; progress may be attached.
    Running,
    /// Completed successfully.
    Finished,
    /// Completed unsuccessfully. Terminal; never retried by the engine.
    Failed,
}

impl ExecutionStatus {
    /// Returns whether this status is terminal (i.e., no further updates are expected).
    #[inline]
    pub fn is_terminal(&self) -> bool { matches!(self, Self::Finished | Self::Failed) }
}

impl Display for ExecutionStatus {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use ExecutionStatus::*;
        match self {
            Scheduled => write!(f, "SCHEDULED"),
            Running   => write!(f, "RUNNING"),
            Finished  => write!(f, "FINISHED"),
            Failed    => write!(f, "FAILED"),
        }
    }
}



/// Defines the record kept for every execution, as persisted per stage and returned to pollers.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ExecutionRecord {
    /// The unique identifier of the execution.
    pub id     : String,
    /// The externally visible status.
    pub status : ExecutionStatus,

    /// The captured output of the application, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs  : Option<String>,
    /// The (updated) views of the application, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub views : Option<Vec<Value>>,
    /// Progress information as pushed by the executor process, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tqdm  : Option<Value>,
}

impl ExecutionRecord {
    /// Constructor for an ExecutionRecord that has just been accepted.
    ///
    /// # Arguments
    /// - `id`: The unique identifier of the execution.
    /// - `views`: The views the caller submitted, if any.
    ///
    /// # Returns
    /// A new ExecutionRecord with status `SCHEDULED`.
    #[inline]
    pub fn scheduled(id: impl Into<String>, views: Option<Vec<Value>>) -> Self {
        Self {
            id     : id.into(),
            status : ExecutionStatus::Scheduled,

            logs : None,
            views,
            tqdm : None,
        }
    }

    /// Constructor for an ExecutionRecord that is making progress.
    ///
    /// # Arguments
    /// - `id`: The unique identifier of the execution.
    /// - `tqdm`: The progress information pushed by the executor process.
    ///
    /// # Returns
    /// A new ExecutionRecord with status `RUNNING`.
    #[inline]
    pub fn running(id: impl Into<String>, tqdm: Value) -> Self {
        Self {
            id     : id.into(),
            status : ExecutionStatus::Running,

            logs  : None,
            views : None,
            tqdm  : Some(tqdm),
        }
    }

    /// Constructor for an ExecutionRecord that has terminally failed.
    ///
    /// # Arguments
    /// - `id`: The unique identifier of the execution.
    /// - `logs`: A human-readable description of what went wrong.
    ///
    /// # Returns
    /// A new ExecutionRecord with status `FAILED`.
    #[inline]
    pub fn failed(id: impl Into<String>, logs: impl Into<String>) -> Self {
        Self {
            id     : id.into(),
            status : ExecutionStatus::Failed,

            logs  : Some(logs.into()),
            views : None,
            tqdm  : None,
        }
    }
}
