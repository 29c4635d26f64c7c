//  STORE.rs
//    by Lut99
//
//  Created:
//    07 Feb 2023, 13:18:42
//  Last edited:
//    27 Mar 2023, 16:10:29
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the execution state store: a durable, stage-based record
//!   of each execution's status, used for asynchronous polling.
//

use std::path::PathBuf;

use tokio::fs as tfs;
use uuid::Uuid;

use specifications::execution::{ExecutionRecord, Stage};

pub use crate::errors::StoreError as Error;


/***** TESTS *****/
#[cfg(test)]
mod tests {
    use serde_json::json;
    use specifications::execution::ExecutionStatus;
    use super::*;

    /// The most advanced stage that exists wins.
    #[tokio::test]
    async fn latest_stage_wins() {
        let root = tempfile::tempdir().unwrap();
        let store: ExecutionStore = ExecutionStore::new(root.path());

        store.write_stage(Stage::Staged, &ExecutionRecord::scheduled("abc", None)).await.unwrap();
        let record: ExecutionRecord = store.read_latest("abc").await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Scheduled);

        store.write_stage(Stage::Finished, &ExecutionRecord::failed("abc", "oof")).await.unwrap();
        let record: ExecutionRecord = store.read_latest("abc").await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);

        // Unknown ids resolve to nothing
        assert!(store.read_latest("unknown").await.unwrap().is_none());
    }

    /// An empty record file does not shadow an earlier stage.
    #[tokio::test]
    async fn empty_record_is_ignored() {
        let root = tempfile::tempdir().unwrap();
        let store: ExecutionStore = ExecutionStore::new(root.path());

        store.write_stage(Stage::Staged, &ExecutionRecord::scheduled("abc", None)).await.unwrap();
        tfs::create_dir_all(root.path().join(Stage::Running.dirname())).await.unwrap();
        tfs::write(root.path().join(Stage::Running.dirname()).join("abc.json"), "").await.unwrap();

        let record: ExecutionRecord = store.read_latest("abc").await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Scheduled);
    }

    /// Creating the same execution twice is rejected, not overwritten.
    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let store: ExecutionStore = ExecutionStore::new(root.path());

        store.write_stage(Stage::Staged, &ExecutionRecord::scheduled("abc", Some(vec![ json!({ "id": "v1" }) ]))).await.unwrap();
        let res: Result<(), Error> = store.write_stage(Stage::Staged, &ExecutionRecord::scheduled("abc", None)).await;
        assert!(matches!(res, Err(Error::DuplicateExecution{ .. })));

        // The original record is untouched
        let record: ExecutionRecord = store.read_latest("abc").await.unwrap().unwrap();
        assert!(record.views.is_some());

        // Later stages may be written as often as needed
        store.write_stage(Stage::Running, &ExecutionRecord::running("abc", json!({ "n": 1 }))).await.unwrap();
        store.write_stage(Stage::Running, &ExecutionRecord::running("abc", json!({ "n": 2 }))).await.unwrap();
    }

    /// The meta index maps execution ids back to their owning stack.
    #[tokio::test]
    async fn meta_roundtrip() {
        let root = tempfile::tempdir().unwrap();
        let store: ExecutionStore = ExecutionStore::new(root.path());

        store.write_meta("abc", "alice/app").await.unwrap();
        assert_eq!(store.read_meta("abc").await.unwrap(), Some("alice/app".into()));
        assert_eq!(store.read_meta("unknown").await.unwrap(), None);
    }
}





/***** LIBRARY *****/
/// Implements the durable, stage-based store of execution records.
///
/// Records live as `<root>/<stage>/<id>.json`; the meta index as `<root>/meta/<id>.txt`. Every
/// write goes to a temporary file in the target directory first and is renamed into place, so a
/// reader never observes a half-written record.
#[derive(Clone, Debug)]
pub struct ExecutionStore {
    /// The directory under which all stages live.
    root : PathBuf,
}

impl ExecutionStore {
    /// Constructor for the ExecutionStore.
    ///
    /// # Arguments
    /// - `root`: The directory under which all stages live.
    ///
    /// # Returns
    /// A new ExecutionStore instance.
    #[inline]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root : root.into(),
        }
    }



    /// Returns the file a record of the given stage lives in.
    #[inline]
    fn stage_file(&self, stage: Stage, id: &str) -> PathBuf { self.root.join(stage.dirname()).join(format!("{}.json", id)) }

    /// Returns the meta index file of the given execution.
    #[inline]
    fn meta_file(&self, id: &str) -> PathBuf { self.root.join("meta").join(format!("{}.txt", id)) }



    /// Writes the given record as the given stage's checkpoint of its execution.
    ///
    /// Writing the `staged` stage is a create: doing so for an id that already has a staged record
    /// is rejected. Later stages may be (re)written freely.
    ///
    /// # Arguments
    /// - `stage`: The stage to checkpoint.
    /// - `record`: The record to persist. Its id determines the file written.
    ///
    /// # Errors
    /// This function errors if the execution already exists (staged stage only), or any of the
    /// file operations failed.
    pub async fn write_stage(&self, stage: Stage, record: &ExecutionRecord) -> Result<(), Error> {
        let dir: PathBuf = self.root.join(stage.dirname());
        let file: PathBuf = self.stage_file(stage, &record.id);
        if stage == Stage::Staged && file.exists() { return Err(Error::DuplicateExecution{ id: record.id.clone() }); }

        if let Err(err) = tfs::create_dir_all(&dir).await { return Err(Error::DirCreateError{ path: dir, err }); }

        // Serialize the record
        let json: String = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(err) => { return Err(Error::RecordSerializeError{ id: record.id.clone(), err }); },
        };

        // Write to a sibling temp file, then rename into place for atomic visibility
        let temp: PathBuf = dir.join(format!(".{}-{}.tmp", record.id, Uuid::new_v4()));
        if let Err(err) = tfs::write(&temp, json).await { return Err(Error::TempWriteError{ path: temp, err }); }
        if let Err(err) = tfs::rename(&temp, &file).await { return Err(Error::FileMoveError{ from: temp, to: file, err }); }

        // Done
        Ok(())
    }

    /// Reads the record of the given stage, if it exists and is non-empty.
    ///
    /// # Arguments
    /// - `stage`: The stage to read.
    /// - `id`: The execution to read the record of.
    ///
    /// # Returns
    /// The record, or `None` if this stage has no (non-empty) checkpoint for this execution.
    ///
    /// # Errors
    /// This function errors if the record exists but could not be read or parsed.
    pub async fn read_stage(&self, stage: Stage, id: &str) -> Result<Option<ExecutionRecord>, Error> {
        let file: PathBuf = self.stage_file(stage, id);
        match tfs::metadata(&file).await {
            Ok(meta) if meta.len() > 0 => {},
            _ => { return Ok(None); },
        }

        let raw: String = match tfs::read_to_string(&file).await {
            Ok(raw)  => raw,
            Err(err) => { return Err(Error::FileReadError{ path: file, err }); },
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(err)   => Err(Error::RecordParseError{ path: file, err }),
        }
    }

    /// Reads the most advanced record that exists for the given execution.
    ///
    /// # Arguments
    /// - `id`: The execution to read the record of.
    ///
    /// # Returns
    /// The record of the most advanced stage (`finished` > `running` > `staged`), or `None` if the
    /// execution is unknown.
    ///
    /// # Errors
    /// This function errors if a record exists but could not be read or parsed.
    pub async fn read_latest(&self, id: &str) -> Result<Option<ExecutionRecord>, Error> {
        for stage in Stage::PRIORITY {
            if let Some(record) = self.read_stage(stage, id).await? { return Ok(Some(record)); }
        }
        Ok(None)
    }



    /// Writes the meta index entry that maps the given execution to its owning stack.
    ///
    /// # Arguments
    /// - `id`: The execution to write the entry for.
    /// - `stack_path`: The path of the owning stack.
    ///
    /// # Errors
    /// This function errors if the file operations failed.
    pub async fn write_meta(&self, id: &str, stack_path: &str) -> Result<(), Error> {
        let file: PathBuf = self.meta_file(id);
        let dir: PathBuf = self.root.join("meta");
        if let Err(err) = tfs::create_dir_all(&dir).await { return Err(Error::DirCreateError{ path: dir, err }); }
        if let Err(err) = tfs::write(&file, stack_path).await { return Err(Error::MetaWriteError{ path: file, err }); }
        Ok(())
    }

    /// Reads the meta index entry of the given execution.
    ///
    /// # Arguments
    /// - `id`: The execution to read the entry of.
    ///
    /// # Returns
    /// The path of the owning stack, or `None` if no entry exists (the index is best-effort).
    ///
    /// # Errors
    /// This function errors if the entry exists but could not be read.
    pub async fn read_meta(&self, id: &str) -> Result<Option<String>, Error> {
        let file: PathBuf = self.meta_file(id);
        if !file.exists() { return Ok(None); }
        match tfs::read_to_string(&file).await {
            Ok(path) => Ok(Some(path)),
            Err(err) => Err(Error::MetaReadError{ path: file, err }),
        }
    }
}
