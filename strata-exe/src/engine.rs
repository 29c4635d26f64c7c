//  ENGINE.rs
//    by Lut99
//
//  Created:
//    08 Feb 2023, 14:05:11
//  Last edited:
//    27 Mar 2023, 17:20:36
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the admission/polling facade of the execution engine:
//!   the `execute` and `poll` entry points the REST layer calls into.
//!   All provisioning and process details stay behind it.
//

use std::sync::Arc;

use log::{debug, error, info};
use serde_json::Value;

use specifications::execution::{ExecutionRecord, Stage};
use specifications::stack::{Attachment, Frame, User};
use strata_cfg::engine::EngineConfig;

pub use crate::errors::ExecuteError as Error;
use crate::cache::AccessCache;
use crate::spec::{BundleStore, ExecId, ExecutionRequest, RequestKind};
use crate::store::ExecutionStore;
use crate::worker::{WorkerContext, WorkerRegistry};


/***** TESTS *****/
#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::path::PathBuf;
    use serde_json::{json, Map};
    use specifications::execution::ExecutionStatus;
    use crate::dummy::{build_bundle, DummyStore};
    #[cfg(unix)]
    use crate::dummy::{sink_lines, wait_until, write_script};
    use super::*;


    /// Builds an engine around the given runtime executable and bundle bytes.
    fn engine(root: &std::path::Path, runtime: impl Into<PathBuf>, bytes: Vec<u8>) -> ExecutionEngine {
        let mut config: EngineConfig = EngineConfig::default();
        config.paths.applications = root.join("applications");
        config.paths.executions = root.join("executions");
        config.runtimes.insert("3.8".into(), runtime.into());
        ExecutionEngine::new(config, Arc::new(DummyStore::new(bytes)))
    }

    /// Returns a frame declaring the given Python version (or none at all).
    fn frame(version: Option<(u64, u64)>) -> Frame {
        let settings: Map<String, Value> = match version {
            Some((major, minor)) => json!({ "python": { "major": major, "minor": minor } }).as_object().cloned().unwrap(),
            None                 => Map::new(),
        };
        Frame::new("latest", settings)
    }


    /// An undeclared runtime version yields a terminal FAILED record naming it, without any worker.
    #[tokio::test]
    async fn unsupported_runtime_fails_without_spawning() {
        let root = tempfile::tempdir().unwrap();
        let engine: ExecutionEngine = engine(root.path(), "/usr/bin/python3.8", vec![]);

        let record: ExecutionRecord = engine.execute("alice/app", &User::new("alice", "secret"), &frame(Some((2, 3))), &Attachment::new("bundle", Map::new()), None, RequestKind::Apply(true), None).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.logs.as_ref().unwrap().contains("2.3"));
        assert!(engine.registry.is_empty());

        // The record is persisted, so pollers see the same thing
        let polled: ExecutionRecord = engine.poll(&record.id).await.unwrap().unwrap();
        assert_eq!(polled.status, ExecutionStatus::Failed);
    }

    /// A frame without a declared version yields a terminal FAILED record as well.
    #[tokio::test]
    async fn missing_version_fails() {
        let root = tempfile::tempdir().unwrap();
        let engine: ExecutionEngine = engine(root.path(), "/usr/bin/python3.8", vec![]);

        let record: ExecutionRecord = engine.execute("alice/app", &User::new("alice", "secret"), &frame(None), &Attachment::new("bundle", Map::new()), None, RequestKind::Apply(true), None).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.logs.as_ref().unwrap().contains("missing"));
        assert!(engine.registry.is_empty());
    }

    /// Polling an unknown id resolves to nothing.
    #[tokio::test]
    async fn poll_unknown_is_none() {
        let root = tempfile::tempdir().unwrap();
        let engine: ExecutionEngine = engine(root.path(), "/usr/bin/python3.8", vec![]);
        assert!(engine.poll("unknown").await.unwrap().is_none());
    }

    /// A progress push becomes a running-stage record.
    #[tokio::test]
    async fn update_writes_running_record() {
        let root = tempfile::tempdir().unwrap();
        let engine: ExecutionEngine = engine(root.path(), "/usr/bin/python3.8", vec![]);

        engine.update("abc", json!({ "n": 3, "total": 10 })).await.unwrap();
        let record: ExecutionRecord = engine.poll("abc").await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Running);
        assert_eq!(record.tqdm, Some(json!({ "n": 3, "total": 10 })));
    }

    /// A fresh grant skips the authorization check; an expired or missing one does not.
    #[tokio::test]
    async fn poll_authorization_is_cached() {
        let root = tempfile::tempdir().unwrap();
        let engine: ExecutionEngine = engine(root.path(), "/usr/bin/python3.8", vec![]);

        let checks: Cell<usize> = Cell::new(0);
        let check = || { checks.set(checks.get() + 1); true };

        assert!(engine.authorize_poll("abc", "token", check));
        assert_eq!(checks.get(), 1);
        assert!(engine.authorize_poll("abc", "token", check));
        assert_eq!(checks.get(), 1);

        // Denials are not cached
        assert!(!engine.authorize_poll("abc", "other", || false));
        assert!(!engine.authorize_poll("abc", "other", || false));
    }

    /// The full admission path: scheduled record, meta entry, and the request on the worker's stdin.
    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread")]
    async fn execute_schedules_and_feeds_worker() {
        // Setup the simple logger
        #[cfg(feature = "test_logging")]
        if let Err(err) = simplelog::TermLogger::init(log::LevelFilter::Debug, Default::default(), simplelog::TerminalMode::Mixed, simplelog::ColorChoice::Auto) {
            eprintln!("WARNING: Failed to setup logger: {} (no logging for this session)", err);
        }

        let root = tempfile::tempdir().unwrap();
        let sink: PathBuf = root.path().join("sink.txt");
        let script: PathBuf = root.path().join("runtime.sh");
        write_script(&script, format!("#!/bin/sh\nexec cat >> {}\n", sink.display())).await;
        let engine: ExecutionEngine = engine(root.path(), &script, build_bundle(&[ ("app.py", b"") ]).await);

        let views: Vec<Value> = vec![ json!({ "id": "v1", "data": "hello" }) ];
        let record: ExecutionRecord = engine.execute("alice/app", &User::new("alice", "secret"), &frame(Some((3, 8))), &Attachment::new("bundle", Map::new()), Some(views.clone()), RequestKind::Apply(true), None).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Scheduled);
        assert_eq!(record.views, Some(views.clone()));

        // Both the record and the meta entry are in place
        let polled: ExecutionRecord = engine.poll(&record.id).await.unwrap().unwrap();
        assert_eq!(polled.status, ExecutionStatus::Scheduled);
        assert_eq!(engine.stack_path(&record.id).await.unwrap(), Some("alice/app".into()));

        // The worker passed our request on verbatim
        wait_until("the request to arrive", || sink_lines(&sink).len() == 1).await;
        let line: Value = serde_json::from_str(&sink_lines(&sink)[0]).unwrap();
        assert_eq!(line["id"], json!(record.id));
        assert_eq!(line["views"], json!(views));
        assert_eq!(line["apply"], json!(true));

        // A follow-up without views inherits them from the execution it continues
        let followup: ExecutionRecord = engine.execute("alice/app", &User::new("alice", "secret"), &frame(Some((3, 8))), &Attachment::new("bundle", Map::new()), None, RequestKind::Apply(false), Some(&record.id)).await.unwrap();
        assert_eq!(followup.views, Some(views.clone()));
        wait_until("the follow-up to arrive", || sink_lines(&sink).len() == 2).await;
        let line: Value = serde_json::from_str(&sink_lines(&sink)[1]).unwrap();
        assert_eq!(line["views"], json!(views));
    }
}





/***** LIBRARY *****/
/// Implements the external-facing contract of the local execution engine.
///
/// Orchestrates the provisioner, the environment builder and the worker supervisor behind the two
/// entry points the REST layer actually calls: `execute` and `poll` (plus the `update` progress
/// push coming back from the executor's side).
pub struct ExecutionEngine {
    /// The engine configuration.
    config   : EngineConfig,
    /// The durable execution state store.
    store    : Arc<ExecutionStore>,
    /// The registry of live workers.
    registry : WorkerRegistry,
    /// The time-boxed poll-permission cache.
    cache    : AccessCache,
}

impl ExecutionEngine {
    /// Constructor for the ExecutionEngine.
    ///
    /// # Arguments
    /// - `config`: The engine configuration.
    /// - `bundles`: The file store holding the raw bundle payloads.
    ///
    /// # Returns
    /// A new ExecutionEngine instance without any live workers yet.
    pub fn new(config: EngineConfig, bundles: Arc<dyn BundleStore>) -> Self {
        let store: Arc<ExecutionStore> = Arc::new(ExecutionStore::new(config.paths.executions.clone()));
        let registry: WorkerRegistry = WorkerRegistry::new(config.clone(), store.clone(), bundles);
        Self {
            config,
            store,
            registry,
            cache : AccessCache::default(),
        }
    }



    /// Writes and returns a terminal FAILED record for the given execution.
    ///
    /// # Arguments
    /// - `id`: The execution to fail.
    /// - `logs`: A human-readable description of what went wrong.
    ///
    /// # Errors
    /// This function errors if the record could not be persisted.
    async fn fail(&self, id: &ExecId, logs: impl Into<String>) -> Result<ExecutionRecord, Error> {
        let record: ExecutionRecord = ExecutionRecord::failed(id.to_string(), logs);
        if let Err(err) = self.store.write_stage(Stage::Finished, &record).await { return Err(Error::StoreError{ err }); }
        Ok(record)
    }



    /// Admits a new execution against the given stack's application bundle.
    ///
    /// Makes sure the bundle is provisioned and a worker is running, writes the staged record and
    /// enqueues the request. Returns immediately: either with an already-terminal record (error
    /// paths) or with the freshly minted SCHEDULED one. The result proper is retrieved later via
    /// `poll`.
    ///
    /// # Arguments
    /// - `stack_path`: The path of the stack the execution belongs to (for the meta index).
    /// - `user`: The user on whose behalf the application runs.
    /// - `frame`: The frame that was pushed, carrying the declared Python version.
    /// - `attachment`: The attachment that carries the application bundle.
    /// - `views`: The form inputs the caller submitted, if any.
    /// - `kind`: What the application is asked to do.
    /// - `previous`: An execution this one continues; its views are inherited if `views` is absent.
    ///
    /// # Returns
    /// The execution record as it stands after admission.
    ///
    /// # Errors
    /// This function errors only if the state store itself is inaccessible; every execution-level
    /// problem surfaces as a FAILED record instead, since the caller polls asynchronously and
    /// cannot catch anything.
    pub async fn execute(&self, stack_path: &str, user: &User, frame: &Frame, attachment: &Attachment, views: Option<Vec<Value>>, kind: RequestKind, previous: Option<&str>) -> Result<ExecutionRecord, Error> {
        let id: ExecId = ExecId::generate();
        info!("Admitting execution '{}' against bundle '{}'", id, attachment.file_path);

        // Every outcome, including failure, is attributable to its stack
        if let Err(err) = self.store.write_meta(&id.to_string(), stack_path).await { return Err(Error::StoreError{ err }); }

        // Without a (configured) runtime there is nothing to spawn
        let version: String = match frame.python_version() {
            Some(version) => version,
            None          => { return self.fail(&id, "The Python version is missing in the application. Make sure you use the latest client to push the application.").await; },
        };
        if self.config.runtime(&version).is_none() {
            return self.fail(&id, format!("The required Python version is not supported: {}", version)).await;
        }

        // A follow-up request may inherit the views of the execution it continues
        let views: Option<Vec<Value>> = match views {
            Some(views) => Some(views),
            None => match previous {
                Some(previous) => match self.store.read_latest(previous).await {
                    Ok(record) => record.and_then(|r| r.views),
                    Err(err)   => { return Err(Error::StoreError{ err }); },
                },
                None => None,
            },
        };

        // Stage the record before anything can pick the id up
        let record: ExecutionRecord = ExecutionRecord::scheduled(id.to_string(), views.clone());
        if let Err(err) = self.store.write_stage(Stage::Staged, &record).await { return Err(Error::StoreError{ err }); }

        // Route to the bundle's worker, provisioning it if this is the bundle's first execution
        let context: WorkerContext = WorkerContext {
            user       : user.clone(),
            attachment : attachment.clone(),
            version,
        };
        let (handle, already_running) = self.registry.get_or_create(context);
        debug!("Worker for bundle '{}' {}", attachment.file_path, if already_running { "reused" } else { "started" });

        if let Err(err) = handle.submit(ExecutionRequest::new(id.to_string(), views, kind)) {
            error!("{}", err);
            return self.fail(&id, err.to_string()).await;
        }

        // Report the record as it stands (SCHEDULED, unless something already caught up with us)
        match self.store.read_latest(&id.to_string()).await {
            Ok(Some(record)) => Ok(record),
            Ok(None)         => Ok(record),
            Err(err)         => Err(Error::StoreError{ err }),
        }
    }

    /// Returns the current record of the given execution.
    ///
    /// # Arguments
    /// - `id`: The execution to look up.
    ///
    /// # Returns
    /// The record of the most advanced stage that exists, or `None` if the id is unknown.
    ///
    /// # Errors
    /// This function errors if the state store is inaccessible.
    pub async fn poll(&self, id: &str) -> Result<Option<ExecutionRecord>, Error> {
        match self.store.read_latest(id).await {
            Ok(record) => Ok(record),
            Err(err)   => Err(Error::StoreError{ err }),
        }
    }

    /// Records a progress push from the executor's side as the running-stage record.
    ///
    /// # Arguments
    /// - `id`: The execution the progress belongs to.
    /// - `tqdm`: The progress information.
    ///
    /// # Errors
    /// This function errors if the state store is inaccessible.
    pub async fn update(&self, id: &str, tqdm: Value) -> Result<(), Error> {
        match self.store.write_stage(Stage::Running, &ExecutionRecord::running(id, tqdm)).await {
            Ok(_)    => Ok(()),
            Err(err) => Err(Error::StoreError{ err }),
        }
    }

    /// Returns the stack the given execution belongs to, for the caller's permission check.
    ///
    /// # Arguments
    /// - `id`: The execution to look up.
    ///
    /// # Returns
    /// The stack path, or `None` if the (best-effort) meta index has no entry.
    ///
    /// # Errors
    /// This function errors if the state store is inaccessible.
    pub async fn stack_path(&self, id: &str) -> Result<Option<String>, Error> {
        match self.store.read_meta(id).await {
            Ok(path) => Ok(path),
            Err(err) => Err(Error::StoreError{ err }),
        }
    }

    /// Checks whether the given token may poll the given execution, consulting the grant cache
    /// before the (typically expensive) authorization check.
    ///
    /// # Arguments
    /// - `id`: The execution being polled.
    /// - `token`: The bearer token presented by the poller.
    /// - `check`: The actual authorization check, run only on a cache miss. Successes are
    ///   remembered until they expire; denials are never cached.
    ///
    /// # Returns
    /// True if the poll is authorized, false otherwise.
    pub fn authorize_poll(&self, id: &str, token: &str, check: impl FnOnce() -> bool) -> bool {
        if self.cache.is_fresh(id, token) { return true; }
        if check() {
            self.cache.remember(id, token);
            return true;
        }
        false
    }
}
