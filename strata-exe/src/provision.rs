//  PROVISION.rs
//    by Lut99
//
//  Created:
//    07 Feb 2023, 09:12:08
//  Last edited:
//    27 Mar 2023, 15:44:21
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the package provisioner, which turns the raw archive
//!   bytes of an application bundle into an unpacked, driver-equipped
//!   bundle directory.
//

use std::path::{Component, Path, PathBuf};

use async_compression::tokio::bufread::GzipDecoder;
use futures_util::StreamExt;
use log::debug;
use tokio::fs as tfs;
use tokio_tar::Archive;

pub use crate::errors::ProvisionError as Error;
use crate::spec::BundleStore;


/***** TESTS *****/
#[cfg(test)]
mod tests {
    use crate::dummy::{build_bundle, DummyStore};
    use super::*;


    /// Extracting the same bundle twice touches the store only once, and does not resurrect files.
    #[tokio::test]
    async fn extraction_is_idempotent() {
        let apps = tempfile::tempdir().unwrap();
        let store: DummyStore = DummyStore::new(build_bundle(&[ ("app.py", b"print('hi')") ]).await);

        let dest: PathBuf = ensure_extracted(&store, apps.path(), "alice/app/c4ff3").await.unwrap();
        assert!(dest.join("app.py").exists());
        assert!(dest.join(FLAG_FILE).exists());
        assert!(dest.join(driver_filename()).exists());
        assert_eq!(store.gets(), 1);

        // The flag short-circuits the second call entirely
        tfs::remove_file(dest.join("app.py")).await.unwrap();
        ensure_extracted(&store, apps.path(), "alice/app/c4ff3").await.unwrap();
        assert_eq!(store.gets(), 1);
        assert!(!dest.join("app.py").exists());
    }

    /// An entry that climbs out of the bundle directory fails the whole extraction and leaves no trace.
    #[tokio::test]
    async fn extraction_rejects_traversal() {
        let apps = tempfile::tempdir().unwrap();
        let store: DummyStore = DummyStore::new(build_bundle(&[ ("../evil.sh", b"#!/bin/sh") ]).await);

        let res: Result<PathBuf, Error> = ensure_extracted(&store, apps.path(), "bundle").await;
        assert!(matches!(res, Err(Error::PathTraversal{ .. })));
        assert!(!apps.path().join("evil.sh").exists());
        // No flag was written, so a retry starts from scratch
        assert!(!apps.path().join("bundle").join(FLAG_FILE).exists());
    }

    /// A missing (or outdated) driver is redeployed even when the bundle itself is already unpacked.
    #[tokio::test]
    async fn driver_is_redeployed() {
        let apps = tempfile::tempdir().unwrap();
        let store: DummyStore = DummyStore::new(build_bundle(&[ ("app.py", b"") ]).await);

        let dest: PathBuf = ensure_extracted(&store, apps.path(), "bundle").await.unwrap();
        assert_eq!(tfs::read_to_string(dest.join(driver_filename())).await.unwrap(), DRIVER_SOURCE);

        // Simulate a bundle directory provisioned by an older release
        tfs::remove_file(dest.join(driver_filename())).await.unwrap();
        tfs::write(dest.join("execute_v0.py"), "outdated").await.unwrap();

        ensure_extracted(&store, apps.path(), "bundle").await.unwrap();
        assert_eq!(store.gets(), 1);
        assert!(dest.join("execute_v0.py").exists());
        assert_eq!(tfs::read_to_string(dest.join(driver_filename())).await.unwrap(), DRIVER_SOURCE);
    }
}





/***** CONSTANTS *****/
/// The version of the executor driver bundled with this release. Bumping it makes every bundle
/// directory pick up a fresh driver on its next execution.
pub const DRIVER_VERSION: u32 = 3;

/// The source of the executor driver bundled with this release.
pub(crate) const DRIVER_SOURCE: &str = include_str!("../resources/driver.py");

/// The name of the sentinel file that marks a bundle directory as completely extracted.
pub(crate) const FLAG_FILE: &str = "flag";



/// Returns the filename under which the bundled executor driver is deployed.
#[inline]
pub fn driver_filename() -> String { format!("execute_v{}.py", DRIVER_VERSION) }





/***** HELPER FUNCTIONS *****/
/// Checks whether the given archive entry path stays within the directory it is unpacked in.
///
/// # Arguments
/// - `path`: The relative path of the archive entry.
///
/// # Returns
/// False if the path is absolute or climbs out through a parent component, true otherwise.
fn is_contained(path: &Path) -> bool {
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::ParentDir => { return false; },
            _ => {},
        }
    }
    true
}

/// Unpacks the given gzipped tarball into the given directory, entry by entry.
///
/// Every entry is containment-checked before any of its bytes are written: first lexically, then
/// against the canonicalized parent directory (which catches escapes through symlinked parents).
///
/// # Arguments
/// - `bytes`: The raw (compressed) archive bytes.
/// - `dest`: The directory to unpack into. Must already exist.
///
/// # Errors
/// This function errors if the archive is unreadable, or any entry resolves outside of `dest`.
async fn unpack_bundle(bytes: &[u8], dest: &Path) -> Result<(), Error> {
    // Resolve the destination itself first, so the per-entry checks compare canonical to canonical
    let dest_canon: PathBuf = match tfs::canonicalize(dest).await {
        Ok(path) => path,
        Err(err) => { return Err(Error::DirCanonicalizeError{ path: dest.into(), err }); },
    };

    // Go through the entries
    let mut archive: Archive<GzipDecoder<&[u8]>> = Archive::new(GzipDecoder::new(bytes));
    let mut entries = match archive.entries() {
        Ok(entries) => entries,
        Err(err)    => { return Err(Error::EntriesError{ err }); },
    };
    while let Some(entry) = entries.next().await {
        // Make sure the entry is legible
        let mut entry = match entry {
            Ok(entry) => entry,
            Err(err)  => { return Err(Error::EntryError{ err }); },
        };
        let entry_path: PathBuf = match entry.path() {
            Ok(path) => path.to_path_buf(),
            Err(err) => { return Err(Error::EntryPathError{ err }); },
        };

        // Anything that climbs out fails the whole extraction
        if !is_contained(&entry_path) { return Err(Error::PathTraversal{ entry: entry_path }); }
        let dest_file: PathBuf = dest.join(&entry_path);

        if entry.header().entry_type().is_dir() {
            if let Err(err) = tfs::create_dir_all(&dest_file).await { return Err(Error::EntryDirCreateError{ path: dest_file, err }); }
            continue;
        }

        // Make sure the parent exists and still resolves underneath the destination
        let parent: PathBuf = dest_file.parent().map(PathBuf::from).unwrap_or_else(|| dest.into());
        if let Err(err) = tfs::create_dir_all(&parent).await { return Err(Error::EntryDirCreateError{ path: parent, err }); }
        let parent_canon: PathBuf = match tfs::canonicalize(&parent).await {
            Ok(path) => path,
            Err(err) => { return Err(Error::DirCanonicalizeError{ path: parent, err }); },
        };
        if !parent_canon.starts_with(&dest_canon) { return Err(Error::PathTraversal{ entry: entry_path }); }

        // Now it is safe to write the entry
        if let Err(err) = entry.unpack(&dest_file).await { return Err(Error::EntryWriteError{ path: dest_file, err }); }
        debug!(" > Unpacked '{}'", entry_path.display());
    }

    // Done
    Ok(())
}





/***** LIBRARY *****/
/// Makes sure the given bundle is unpacked and carries the current driver, extracting it if needed.
///
/// Extraction is idempotent: a sentinel file in the bundle directory marks it as complete, and as
/// long as that file exists no disk I/O happens beyond the check. A failed extraction never writes
/// the sentinel, so it can be retried.
///
/// # Arguments
/// - `store`: The file store to fetch the raw bundle payload from.
/// - `applications`: The directory under which all bundle directories live.
/// - `file_path`: The stable path identifying the bundle (both in the store and on disk).
///
/// # Returns
/// The path of the (now) unpacked bundle directory.
///
/// # Errors
/// This function errors if the payload could not be fetched, the archive could not be unpacked or
/// any entry attempted to escape the bundle directory.
pub async fn ensure_extracted(store: &dyn BundleStore, applications: impl AsRef<Path>, file_path: impl AsRef<str>) -> Result<PathBuf, Error> {
    let applications: &Path = applications.as_ref();
    let file_path: &str = file_path.as_ref();

    let dest: PathBuf = applications.join(file_path);
    let flag: PathBuf = dest.join(FLAG_FILE);
    if !flag.exists() {
        debug!("Extracting bundle '{}' to '{}'...", file_path, dest.display());

        // Any partial previous attempt is wiped first
        if dest.exists() {
            if let Err(err) = tfs::remove_dir_all(&dest).await { return Err(Error::DirRemoveError{ path: dest, err }); }
        }
        if let Err(err) = tfs::create_dir_all(&dest).await { return Err(Error::DirCreateError{ path: dest, err }); }

        // Fetch & unpack the payload
        let bytes: Vec<u8> = match store.get(file_path).await {
            Ok(bytes) => bytes,
            Err(err)  => { return Err(Error::PayloadFetchError{ name: file_path.into(), err }); },
        };
        unpack_bundle(&bytes, &dest).await?;

        // Only now the bundle counts as extracted
        if let Err(err) = tfs::File::create(&flag).await { return Err(Error::FlagCreateError{ path: flag, err }); }
    }

    // The driver is versioned, so a release upgrade naturally redeploys it into old bundle directories
    let driver: PathBuf = dest.join(driver_filename());
    if !driver.exists() {
        debug!("Deploying executor driver v{} to '{}'...", DRIVER_VERSION, driver.display());
        if let Err(err) = tfs::write(&driver, DRIVER_SOURCE).await { return Err(Error::DriverWriteError{ path: driver, err }); }
    }

    // Done
    Ok(dest)
}
