//  WORKER.rs
//    by Lut99
//
//  Created:
//    08 Feb 2023, 09:21:34
//  Last edited:
//    27 Mar 2023, 16:40:09
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the worker supervisor: one long-lived executor process
//!   per application bundle, fed serialized requests over its stdin by a
//!   dedicated supervising task, behind a FIFO queue.
//

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::{debug, error, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use specifications::execution::{ExecutionRecord, Stage};
use specifications::stack::{AppFunction, Attachment, User};
use strata_cfg::engine::EngineConfig;
use strata_shr::debug::EnumDebug as _;
use strata_shr::utilities::ensure_http_schema;

pub use crate::errors::WorkerError as Error;
use crate::environment::{self, drain_stderr};
use crate::provision::{self, driver_filename};
use crate::spec::{BundleStore, ExecutionRequest};
use crate::store::ExecutionStore;


/***** TESTS *****/
#[cfg(test)]
mod tests {
    use std::time::Duration;
    use specifications::execution::ExecutionStatus;
    use crate::dummy::{build_bundle, sink_lines, wait_until, DummyStore};
    #[cfg(unix)]
    use crate::dummy::write_script;
    use crate::spec::RequestKind;
    use super::*;


    /// Builds a registry around the given runtime executable and bundle bytes.
    fn registry(root: &std::path::Path, runtime: impl Into<PathBuf>, bytes: Vec<u8>) -> WorkerRegistry {
        let mut config: EngineConfig = EngineConfig::default();
        config.paths.applications = root.join("applications");
        config.paths.executions = root.join("executions");
        config.runtimes.insert("3.8".into(), runtime.into());

        let store: Arc<ExecutionStore> = Arc::new(ExecutionStore::new(config.paths.executions.clone()));
        WorkerRegistry::new(config, store, Arc::new(DummyStore::new(bytes)))
    }

    /// Returns a context for the given bundle path.
    fn context(file_path: &str) -> WorkerContext {
        WorkerContext {
            user       : User::new("alice", "secret"),
            attachment : Attachment::new(file_path, serde_json::Map::new()),
            version    : "3.8".into(),
        }
    }


    /// Spawning N workers for the same bundle concurrently registers exactly one.
    #[tokio::test(flavor = "multi_thread")]
    async fn at_most_one_worker_per_bundle() {
        let root = tempfile::tempdir().unwrap();
        let registry: Arc<WorkerRegistry> = Arc::new(registry(root.path(), "/usr/bin/true", build_bundle(&[ ("app.py", b"") ]).await));

        let mut tasks = vec![];
        for _ in 0..8 {
            let registry: Arc<WorkerRegistry> = registry.clone();
            tasks.push(tokio::spawn(async move {
                let (_, already_running): (WorkerHandle, bool) = registry.get_or_create(context("bundle"));
                already_running
            }));
        }
        let mut fresh: usize = 0;
        for task in tasks {
            if !task.await.unwrap() { fresh += 1; }
        }

        assert_eq!(fresh, 1);
        assert_eq!(registry.len(), 1);
    }

    /// Requests submitted to one bundle reach its process in submission order.
    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread")]
    async fn fifo_within_bundle() {
        let root = tempfile::tempdir().unwrap();
        let sink: PathBuf = root.path().join("sink.txt");
        let script: PathBuf = root.path().join("runtime.sh");
        write_script(&script, format!("#!/bin/sh\nexec cat >> {}\n", sink.display())).await;

        let registry: WorkerRegistry = registry(root.path(), &script, build_bundle(&[ ("app.py", b"") ]).await);
        let (handle, _): (WorkerHandle, bool) = registry.get_or_create(context("bundle"));
        for id in [ "a", "b", "c" ] {
            handle.submit(ExecutionRequest::new(id, None, RequestKind::Apply(false))).unwrap();
        }

        wait_until("all three requests to arrive", || sink_lines(&sink).len() == 3).await;
        let ids: Vec<String> = sink_lines(&sink).iter().map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap()["id"].as_str().unwrap().into()).collect();
        assert_eq!(ids, vec![ "a", "b", "c" ]);
    }

    /// A slow bundle does not hold up an unrelated one.
    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread")]
    async fn bundles_do_not_block_each_other() {
        let root = tempfile::tempdir().unwrap();
        let slow_sink: PathBuf = root.path().join("slow.txt");
        let fast_sink: PathBuf = root.path().join("fast.txt");
        let slow: PathBuf = root.path().join("slow.sh");
        let fast: PathBuf = root.path().join("fast.sh");
        write_script(&slow, format!("#!/bin/sh\nsleep 2\nexec cat >> {}\n", slow_sink.display())).await;
        write_script(&fast, format!("#!/bin/sh\nexec cat >> {}\n", fast_sink.display())).await;

        let mut registry: WorkerRegistry = registry(root.path(), &slow, build_bundle(&[ ("app.py", b"") ]).await);
        registry.config.runtimes.insert("3.9".into(), fast.clone());

        let (slow_handle, _): (WorkerHandle, bool) = registry.get_or_create(context("slow-bundle"));
        let mut fast_context: WorkerContext = context("fast-bundle");
        fast_context.version = "3.9".into();
        let (fast_handle, _): (WorkerHandle, bool) = registry.get_or_create(fast_context);

        slow_handle.submit(ExecutionRequest::new("s", None, RequestKind::Apply(false))).unwrap();
        fast_handle.submit(ExecutionRequest::new("f", None, RequestKind::Apply(false))).unwrap();

        // The fast bundle's request lands while the slow one is still asleep
        wait_until("the fast bundle's request to arrive", || sink_lines(&fast_sink).len() == 1).await;
        assert!(sink_lines(&slow_sink).is_empty());
    }

    /// A dead process is replaced before the next request is written; no request is dropped.
    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread")]
    async fn dead_process_is_respawned() {
        let root = tempfile::tempdir().unwrap();
        let sink: PathBuf = root.path().join("sink.txt");
        let script: PathBuf = root.path().join("runtime.sh");
        // This executor exits after a single request
        write_script(&script, format!("#!/bin/sh\nhead -n 1 >> {}\n", sink.display())).await;

        let registry: WorkerRegistry = registry(root.path(), &script, build_bundle(&[ ("app.py", b"") ]).await);
        let (handle, _): (WorkerHandle, bool) = registry.get_or_create(context("bundle"));

        handle.submit(ExecutionRequest::new("a", None, RequestKind::Apply(false))).unwrap();
        wait_until("the first request to arrive", || sink_lines(&sink).len() == 1).await;

        // Let the process die properly, then submit again
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.submit(ExecutionRequest::new("b", None, RequestKind::Apply(false))).unwrap();
        wait_until("the second request to arrive", || sink_lines(&sink).len() == 2).await;
    }

    /// A worker whose provisioning failed turns every request into a FAILED record.
    #[tokio::test(flavor = "multi_thread")]
    async fn failed_provisioning_fails_requests() {
        // Setup the simple logger
        #[cfg(feature = "test_logging")]
        if let Err(err) = simplelog::TermLogger::init(log::LevelFilter::Debug, Default::default(), simplelog::TerminalMode::Mixed, simplelog::ColorChoice::Auto) {
            eprintln!("WARNING: Failed to setup logger: {} (no logging for this session)", err);
        }

        let root = tempfile::tempdir().unwrap();
        // Not a gzipped tarball, so provisioning cannot succeed
        let registry: WorkerRegistry = registry(root.path(), "/usr/bin/true", b"garbage".to_vec());
        let store: Arc<ExecutionStore> = registry.store.clone();

        let (handle, _): (WorkerHandle, bool) = registry.get_or_create(context("bundle"));
        handle.submit(ExecutionRequest::new("doomed", None, RequestKind::Apply(true))).unwrap();

        // The record only becomes visible through its atomic rename, so existence means complete
        let finished: PathBuf = root.path().join("executions").join(Stage::Finished.dirname()).join("doomed.json");
        wait_until("the FAILED record to appear", || finished.exists()).await;
        let record: ExecutionRecord = store.read_latest("doomed").await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.logs.is_some());
    }
}





/***** HELPER FUNCTIONS *****/
/// Writes a finished-stage FAILED record for the given execution.
///
/// # Arguments
/// - `store`: The execution state store to write to.
/// - `id`: The execution to fail.
/// - `logs`: A human-readable description of what went wrong.
async fn fail_request(store: &ExecutionStore, id: &str, logs: impl Into<String>) {
    if let Err(err) = store.write_stage(Stage::Finished, &ExecutionRecord::failed(id, logs)).await {
        error!("Failed to write FAILED record for execution '{}': {}", id, err);
    }
}





/***** AUXILLARY STRUCTS *****/
/// Collects everything a worker needs to know about the bundle it serves.
#[derive(Clone, Debug)]
pub struct WorkerContext {
    /// The user on whose behalf the application runs.
    pub user       : User,
    /// The attachment that carries the bundle.
    pub attachment : Attachment,
    /// The minor Python version the bundle declares.
    pub version    : String,
}

/// Collects the resolved launch parameters of a provisioned bundle.
#[derive(Clone, Debug)]
struct LaunchPlan {
    /// The (extracted) bundle directory the process runs in.
    dest        : PathBuf,
    /// The interpreter executable to launch.
    interpreter : PathBuf,
    /// The executions home directory handed to the driver.
    executions  : PathBuf,
    /// The API base URL handed to the driver.
    api         : String,
}





/***** WORKER TASK *****/
/// Provisions the bundle and resolves everything needed to launch its executor.
///
/// # Arguments
/// - `config`: The engine configuration.
/// - `bundles`: The file store holding the raw bundle payloads.
/// - `context`: The bundle to provision.
///
/// # Returns
/// The resolved launch parameters.
///
/// # Errors
/// This function errors if extraction or environment building failed.
async fn prepare(config: &EngineConfig, bundles: &dyn BundleStore, context: &WorkerContext) -> Result<LaunchPlan, Error> {
    // Extract the bundle & build its environment (both idempotent)
    let dest: PathBuf = match provision::ensure_extracted(bundles, &config.paths.applications, &context.attachment.file_path).await {
        Ok(dest) => dest,
        Err(err) => { return Err(Error::ProvisionError{ err }); },
    };
    let interpreter: PathBuf = match environment::resolve_interpreter(config, &dest, &context.version).await {
        Ok(interpreter) => interpreter,
        Err(err)        => { return Err(Error::EnvironmentError{ err }); },
    };

    // The driver gets the executions home as an absolute path, since it runs in the bundle dir
    let executions: PathBuf = config.paths.executions.canonicalize().unwrap_or_else(|_| config.paths.executions.clone());

    // Resolve the API base URL
    let api: String = match ensure_http_schema(config.api.address(), false) {
        Ok(url)  => format!("{}/api", url),
        Err(err) => { return Err(Error::ApiUrlError{ raw: config.api.address(), err }); },
    };

    // Done
    Ok(LaunchPlan {
        dest,
        interpreter,
        executions,
        api,
    })
}

/// Launches a fresh executor process for the given bundle.
///
/// # Arguments
/// - `plan`: The resolved launch parameters.
/// - `context`: The bundle to launch for.
///
/// # Returns
/// The child process, with its stderr already being drained to the log.
///
/// # Errors
/// This function errors if the process could not be spawned.
fn launch(plan: &LaunchPlan, context: &WorkerContext) -> Result<Child, Error> {
    let mut cmd: Command = Command::new(&plan.interpreter);
    cmd.arg(driver_filename());
    cmd.arg(&plan.executions);
    if let Some(function) = context.attachment.function() {
        let AppFunction{ kind, data } = function;
        cmd.arg(kind);
        cmd.arg(data);
    }
    cmd.arg(&context.user.name);
    cmd.arg(&context.user.token);
    cmd.arg(&plan.api);
    cmd.current_dir(&plan.dest);
    cmd.stdin(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child: Child = match cmd.spawn() {
        Ok(child) => child,
        Err(err)  => { return Err(Error::LaunchError{ bundle: context.attachment.file_path.clone(), err }); },
    };
    if let Some(handle) = child.stderr.take() {
        drain_stderr(handle, format!("executor ({})", context.attachment.file_path));
    }

    info!("Launched executor process for bundle '{}'", context.attachment.file_path);
    Ok(child)
}

/// Writes the given request to the given process, newline-terminated.
///
/// # Arguments
/// - `child`: The executor process to write to.
/// - `bundle`: The bundle path, for error reporting.
/// - `request`: The request to serialize.
///
/// # Errors
/// This function errors if serialization or the write failed.
async fn write_request(child: &mut Child, bundle: &str, request: &ExecutionRequest) -> Result<(), Error> {
    let stdin: &mut ChildStdin = match child.stdin.as_mut() {
        Some(stdin) => stdin,
        None        => { return Err(Error::StdinClosedError{ bundle: bundle.into() }); },
    };

    let mut line: String = match serde_json::to_string(request) {
        Ok(line) => line,
        Err(err) => { return Err(Error::RequestSerializeError{ err }); },
    };
    line.push('\n');

    if let Err(err) = stdin.write_all(line.as_bytes()).await { return Err(Error::WriteError{ bundle: bundle.into(), err }); }
    if let Err(err) = stdin.flush().await { return Err(Error::WriteError{ bundle: bundle.into(), err }); }
    Ok(())
}

/// The supervising task of a single bundle.
///
/// Owns the bundle's executor process exclusively: it provisions the bundle once, then pulls
/// requests off the queue, (re)spawning the process whenever it finds it dead, and feeds each
/// request to its stdin. Any failure along the way surfaces as a FAILED record for the request at
/// hand; later requests are still served.
///
/// # Arguments
/// - `config`: The engine configuration.
/// - `store`: The execution state store to write failure records to.
/// - `bundles`: The file store holding the raw bundle payloads.
/// - `context`: The bundle this worker serves.
/// - `rx`: The receiving end of the bundle's request queue.
async fn supervise(config: EngineConfig, store: Arc<ExecutionStore>, bundles: Arc<dyn BundleStore>, context: WorkerContext, mut rx: UnboundedReceiver<ExecutionRequest>) {
    let bundle: &str = &context.attachment.file_path;

    // PROVISIONING: a failure here poisons the worker, failing every request it dequeues
    debug!("Provisioning bundle '{}'...", bundle);
    let plan: Result<LaunchPlan, String> = prepare(&config, bundles.as_ref(), &context).await.map_err(|err| {
        error!("Failed to provision bundle '{}': {}", bundle, err);
        err.to_string()
    });

    // READY: pull requests for as long as the queue lives
    let mut process: Option<Child> = None;
    while let Some(request) = rx.recv().await {
        debug!("Dequeued {} request '{}' for bundle '{}'", request.kind.variant(), request.id, bundle);
        let plan: &LaunchPlan = match &plan {
            Ok(plan)    => plan,
            Err(reason) => { fail_request(&store, &request.id, reason).await; continue; },
        };

        // A dead process is only discovered (and replaced) here, on the next dequeue
        if let Some(child) = process.as_mut() {
            match child.try_wait() {
                Ok(None)         => {},
                Ok(Some(status)) => {
                    warn!("Executor process for bundle '{}' exited with {}; respawning", bundle, status);
                    process = None;
                },
                Err(err) => {
                    warn!("Failed to check executor process for bundle '{}' ({}); respawning", bundle, err);
                    process = None;
                },
            }
        }
        if process.is_none() {
            match launch(plan, &context) {
                Ok(child) => { process = Some(child); },
                Err(err)  => {
                    error!("{}", err);
                    fail_request(&store, &request.id, err.to_string()).await;
                    continue;
                },
            }
        }

        // Feed it the request
        if let Some(child) = process.as_mut() {
            if let Err(err) = write_request(child, bundle, &request).await {
                error!("{}", err);
                fail_request(&store, &request.id, err.to_string()).await;
                process = None;
            }
        }
    }

    debug!("Request queue for bundle '{}' closed; worker shutting down", bundle);
}





/***** LIBRARY *****/
/// The submitting end of a bundle's request queue.
#[derive(Clone, Debug)]
pub struct WorkerHandle {
    /// The bundle this handle submits to.
    bundle : String,
    /// The sending end of the queue.
    tx     : UnboundedSender<ExecutionRequest>,
}

impl WorkerHandle {
    /// Enqueues the given request for this handle's bundle.
    ///
    /// Only blocks long enough to enqueue; results are retrieved later by polling the store.
    ///
    /// # Arguments
    /// - `request`: The request to enqueue.
    ///
    /// # Errors
    /// This function errors if the worker's supervising task is gone.
    pub fn submit(&self, request: ExecutionRequest) -> Result<(), Error> {
        match self.tx.send(request) {
            Ok(_)  => Ok(()),
            Err(_) => Err(Error::QueueClosedError{ bundle: self.bundle.clone() }),
        }
    }
}



/// The registry of live workers, keyed by bundle path.
///
/// At most one worker exists per bundle path at a time; the insert is atomic, so concurrent
/// callers for the same bundle race to exactly one spawned worker.
pub struct WorkerRegistry {
    /// The engine configuration handed to every worker.
    config  : EngineConfig,
    /// The execution state store handed to every worker.
    store   : Arc<ExecutionStore>,
    /// The file store holding the raw bundle payloads.
    bundles : Arc<dyn BundleStore>,
    /// The handles of the live workers.
    workers : DashMap<String, WorkerHandle>,
}

impl WorkerRegistry {
    /// Constructor for the WorkerRegistry.
    ///
    /// # Arguments
    /// - `config`: The engine configuration handed to every worker.
    /// - `store`: The execution state store handed to every worker.
    /// - `bundles`: The file store holding the raw bundle payloads.
    ///
    /// # Returns
    /// A new WorkerRegistry instance without any workers yet.
    #[inline]
    pub fn new(config: EngineConfig, store: Arc<ExecutionStore>, bundles: Arc<dyn BundleStore>) -> Self {
        Self {
            config,
            store,
            bundles,
            workers : DashMap::new(),
        }
    }



    /// Returns the worker of the given bundle, spawning it first if there is none.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Arguments
    /// - `context`: The bundle (and its execution context) to get a worker for.
    ///
    /// # Returns
    /// A handle to submit requests with, plus whether the worker was already running (and is thus
    /// reused without re-provisioning).
    pub fn get_or_create(&self, context: WorkerContext) -> (WorkerHandle, bool) {
        match self.workers.entry(context.attachment.file_path.clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), true),
            Entry::Vacant(entry) => {
                let (tx, rx): (UnboundedSender<ExecutionRequest>, UnboundedReceiver<ExecutionRequest>) = mpsc::unbounded_channel();
                let handle: WorkerHandle = WorkerHandle{ bundle: context.attachment.file_path.clone(), tx };
                entry.insert(handle.clone());

                tokio::spawn(supervise(self.config.clone(), self.store.clone(), self.bundles.clone(), context, rx));
                (handle, false)
            },
        }
    }

    /// Returns the number of live workers.
    #[inline]
    pub fn len(&self) -> usize { self.workers.len() }

    /// Returns whether no workers are live.
    #[inline]
    pub fn is_empty(&self) -> bool { self.workers.is_empty() }
}
