//  DUMMY.rs
//    by Lut99
//
//  Created:
//    08 Feb 2023, 11:30:27
//  Last edited:
//    27 Mar 2023, 16:55:40
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines test-only helpers: an in-memory bundle store, a bundle
//!   builder and a few filesystem conveniences.
//

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_compression::tokio::write::GzipEncoder;
use tokio::fs as tfs;
use tokio::io::AsyncWriteExt;
use tokio_tar::{Builder, EntryType, Header};

use crate::errors::BundleError;
use crate::spec::BundleStore;


/***** LIBRARY *****/
/// A BundleStore over fixed bytes that counts how often it is asked for them.
pub struct DummyStore {
    /// The bytes returned for every payload.
    bytes : Vec<u8>,
    /// How often the payload was fetched.
    gets  : AtomicUsize,
}

impl DummyStore {
    /// Constructor for the DummyStore.
    ///
    /// # Arguments
    /// - `bytes`: The bytes returned for every payload.
    ///
    /// # Returns
    /// A new DummyStore instance.
    #[inline]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            gets : AtomicUsize::new(0),
        }
    }

    /// Returns how often the payload was fetched so far.
    #[inline]
    pub fn gets(&self) -> usize { self.gets.load(Ordering::SeqCst) }
}

#[async_trait::async_trait]
impl BundleStore for DummyStore {
    async fn get(&self, _file_path: &str) -> Result<Vec<u8>, BundleError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(self.bytes.clone())
    }
}



/// Builds a gzipped tarball with the given (path, contents) entries.
///
/// # Arguments
/// - `entries`: The (path, contents) pairs to archive.
///
/// # Returns
/// The compressed archive bytes.
pub async fn build_bundle(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = Builder::new(GzipEncoder::new(Vec::new()));
    for (name, data) in entries {
        let mut header: Header = Header::new_gnu();
        // Write the name straight into the header instead of going through `set_path`, which
        // rejects `..` components — the traversal test needs an archive that actually contains one.
        let name_bytes: &[u8] = name.as_bytes();
        header.as_old_mut().name[..name_bytes.len()].clone_from_slice(name_bytes);
        header.set_entry_type(EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, *data).await.unwrap();
    }
    let mut encoder: GzipEncoder<Vec<u8>> = builder.into_inner().await.unwrap();
    encoder.shutdown().await.unwrap();
    encoder.into_inner()
}

/// Writes the given shell script to the given path and makes it executable.
///
/// # Arguments
/// - `path`: The path to write the script to.
/// - `contents`: The script itself.
#[cfg(unix)]
pub async fn write_script(path: &Path, contents: String) {
    use std::os::unix::fs::PermissionsExt;
    tfs::write(path, contents).await.unwrap();
    let mut perms = tfs::metadata(path).await.unwrap().permissions();
    perms.set_mode(0o755);
    tfs::set_permissions(path, perms).await.unwrap();
}

/// Polls the given condition until it holds, or panics after a few seconds.
///
/// # Arguments
/// - `what`: What is being waited for, for the panic message.
/// - `cond`: The condition to poll.
pub async fn wait_until(what: &'static str, mut cond: impl FnMut() -> bool) {
    for _ in 0..100 {
        if cond() { return; }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("Timed out waiting for {}", what);
}

/// Returns the non-empty lines of the given file, or nothing if it does not exist yet.
///
/// # Arguments
/// - `path`: The file to read.
///
/// # Returns
/// The lines, without any trailing empty one.
pub fn sink_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path).map(|raw| raw.lines().filter(|l| !l.is_empty()).map(String::from).collect()).unwrap_or_default()
}
