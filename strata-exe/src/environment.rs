//  ENVIRONMENT.rs
//    by Lut99
//
//  Created:
//    07 Feb 2023, 10:31:55
//  Last edited:
//    27 Mar 2023, 16:02:17
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the environment builder, which resolves the interpreter
//!   to run a bundle with and lazily materializes its isolated virtual
//!   environment.
//

use std::path::{Path, PathBuf};
use std::process::Stdio;

use log::{debug, error};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::task::JoinHandle;

use strata_cfg::engine::EngineConfig;

pub use crate::errors::EnvironmentError as Error;


/***** TESTS *****/
#[cfg(test)]
mod tests {
    use tokio::fs as tfs;
    use super::*;

    /// An undeclared runtime version fails without touching the filesystem.
    #[tokio::test]
    async fn unsupported_version_is_refused() {
        let dest = tempfile::tempdir().unwrap();
        let config: EngineConfig = EngineConfig::default();

        let res: Result<PathBuf, Error> = resolve_interpreter(&config, dest.path(), "2.3").await;
        match res {
            Err(Error::UnsupportedVersion{ version }) => assert_eq!(version, "2.3"),
            other => panic!("Expected UnsupportedVersion, got {:?}", other),
        }
    }

    /// A bundle without a dependency manifest runs on the configured interpreter directly.
    #[tokio::test]
    async fn no_manifest_skips_venv() {
        let dest = tempfile::tempdir().unwrap();
        let mut config: EngineConfig = EngineConfig::default();
        config.runtimes.insert("3.8".into(), "/usr/bin/python3.8".into());

        let interpreter: PathBuf = resolve_interpreter(&config, dest.path(), "3.8").await.unwrap();
        assert_eq!(interpreter, PathBuf::from("/usr/bin/python3.8"));
        assert!(!dest.path().join(VENV_DIR).exists());
    }

    /// A completed environment (flag file present) short-circuits to the venv interpreter.
    #[tokio::test]
    async fn flagged_venv_short_circuits() {
        let dest = tempfile::tempdir().unwrap();
        let mut config: EngineConfig = EngineConfig::default();
        config.runtimes.insert("3.8".into(), "/definitely/not/executable".into());

        // Fake a bundle with a manifest and a previously completed venv
        tfs::write(dest.path().join(REQUIREMENTS_FILE), "pandas\n").await.unwrap();
        let venv: PathBuf = dest.path().join(VENV_DIR);
        tfs::create_dir_all(venv.join("bin")).await.unwrap();
        tfs::write(venv.join("bin").join("python"), "").await.unwrap();
        tfs::write(venv.join(FLAG_FILE), "").await.unwrap();

        // The configured interpreter is never spawned, or this would fail
        let interpreter: PathBuf = resolve_interpreter(&config, dest.path(), "3.8").await.unwrap();
        assert_eq!(interpreter, venv.join("bin").join("python"));
    }
}





/***** CONSTANTS *****/
/// The name of the virtual environment directory within a bundle directory.
pub(crate) const VENV_DIR: &str = "venv";

/// The name of the dependency manifest a bundle may declare.
pub(crate) const REQUIREMENTS_FILE: &str = "requirements.txt";

/// The name of the sentinel file that marks a virtual environment as completely set up.
pub(crate) const FLAG_FILE: &str = "flag";

/// How many trailing stderr lines of a failed provisioning command are kept for the failure record.
const STDERR_TAIL_LINES: usize = 64;





/***** AUXILLARY FUNCTIONS *****/
/// Drains the given stderr handle line-by-line in the background.
///
/// Every line is forwarded to the log as it comes in; only a bounded tail is retained.
///
/// # Arguments
/// - `stderr`: The stderr handle of a child process.
/// - `what`: A short label for the log lines.
///
/// # Returns
/// A handle that yields the retained tail once the stream closes.
pub(crate) fn drain_stderr(stderr: ChildStderr, what: String) -> JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut tail: Vec<String> = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            error!("{}: {}", what, line);
            if tail.len() == STDERR_TAIL_LINES { tail.remove(0); }
            tail.push(line);
        }
        tail
    })
}





/***** HELPER FUNCTIONS *****/
/// Returns the given executable within the virtual environment, wherever the platform put it.
///
/// # Arguments
/// - `venv`: The virtual environment directory.
/// - `name`: The base name of the executable to find.
///
/// # Returns
/// The path of the executable, or `None` if it is in neither of the known locations.
fn find_venv_executable(venv: &Path, name: &str) -> Option<PathBuf> {
    let unix: PathBuf = venv.join("bin").join(name);
    if unix.exists() { return Some(unix); }
    let windows: PathBuf = venv.join("Scripts").join(format!("{}.exe", name));
    if windows.exists() { return Some(windows); }
    None
}

/// Runs the given command to completion, draining its stderr to the log as it goes.
///
/// # Arguments
/// - `cmd`: The command to run. Its stderr configuration is overridden.
/// - `what`: A short label for the log lines.
///
/// # Returns
/// The exit status and the retained stderr tail.
///
/// # Errors
/// This function errors if the command could not be spawned or waited on.
async fn run_to_completion(mut cmd: Command, what: String) -> Result<(std::process::ExitStatus, String), std::io::Error> {
    let mut child = cmd.stderr(Stdio::piped()).spawn()?;
    let drain = child.stderr.take().map(|handle| drain_stderr(handle, what));
    let status = child.wait().await?;
    let tail: Vec<String> = match drain {
        Some(drain) => drain.await.unwrap_or_default(),
        None        => vec![],
    };
    Ok((status, tail.join("\n")))
}





/***** LIBRARY *****/
/// Resolves the interpreter executable to run the given bundle with.
///
/// If the bundle declares a dependency manifest, this builds (or reuses) its virtual environment:
/// stale leftovers are deleted, the environment is created and the manifest installed, both to
/// completion before this function returns. A sentinel file marks success, so repeated calls
/// short-circuit to the previously resolved interpreter.
///
/// # Arguments
/// - `config`: The engine configuration holding the runtime table.
/// - `dest`: The (extracted) bundle directory.
/// - `version`: The minor Python version the bundle declares (e.g., `3.8`).
///
/// # Returns
/// The path of the interpreter executable to launch the executor with.
///
/// # Errors
/// This function errors if no runtime is configured for `version`, or building the virtual
/// environment failed in any way.
pub async fn resolve_interpreter(config: &EngineConfig, dest: &Path, version: impl AsRef<str>) -> Result<PathBuf, Error> {
    let version: &str = version.as_ref();

    // No runtime, no execution
    let interpreter: &PathBuf = match config.runtime(version) {
        Some(interpreter) => interpreter,
        None              => { return Err(Error::UnsupportedVersion{ version: version.into() }); },
    };

    // Without a manifest the bundle runs on the shared interpreter as-is
    if !dest.join(REQUIREMENTS_FILE).exists() { return Ok(interpreter.clone()); }

    // Otherwise, make sure its virtual environment exists
    let venv: PathBuf = dest.join(VENV_DIR);
    let flag: PathBuf = venv.join(FLAG_FILE);
    if !flag.exists() {
        debug!("Building virtual environment in '{}'...", venv.display());

        // A venv without a flag is a leftover of a failed attempt
        if venv.exists() {
            if let Err(err) = tokio::fs::remove_dir_all(&venv).await { return Err(Error::StaleVenvRemoveError{ path: venv, err }); }
        }

        // Create the environment
        let mut cmd: Command = Command::new(interpreter);
        cmd.args([ "-m", "venv", VENV_DIR, "--system-site-packages" ]);
        cmd.current_dir(dest);
        let (status, stderr) = match run_to_completion(cmd, format!("venv ({})", dest.display())).await {
            Ok(res)  => res,
            Err(err) => { return Err(Error::VenvSpawnError{ interpreter: interpreter.clone(), err }); },
        };
        if !status.success() { return Err(Error::VenvFailure{ code: status.code(), stderr }); }

        // Install the manifest
        let pip: PathBuf = match find_venv_executable(&venv, "pip") {
            Some(pip) => pip,
            None      => { return Err(Error::PipNotFound{ path: venv }); },
        };
        let mut cmd: Command = Command::new(&pip);
        cmd.args([ "install", "--disable-pip-version-check", "-r", REQUIREMENTS_FILE ]);
        cmd.current_dir(dest);
        let (status, stderr) = match run_to_completion(cmd, format!("pip ({})", dest.display())).await {
            Ok(res)  => res,
            Err(err) => { return Err(Error::PipSpawnError{ pip, err }); },
        };
        if !status.success() { return Err(Error::PipFailure{ code: status.code(), stderr }); }

        // Only now the environment counts as set up
        if let Err(err) = tokio::fs::File::create(&flag).await { return Err(Error::FlagCreateError{ path: flag, err }); }
    }

    // Resolve the interpreter inside the environment
    match find_venv_executable(&venv, "python") {
        Some(python) => Ok(python),
        None         => Err(Error::InterpreterNotFound{ path: venv }),
    }
}
