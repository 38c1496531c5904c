//! Deterministic gzip-tar archiving of a finalized bundle.
//!
//! Entries are appended in sorted path order with pinned mtimes so the same
//! tree always produces the same archive bytes. The archive is written to
//! `<out>.tmp` and renamed, so a consumer sees either no file or a complete
//! valid gzip-tar.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, info};

use crate::bundle::store::{glob_dir, normalize_path, BundleReader, BundleStore};
use crate::core::errors::{PeriscopeError, Result};

/// Create a gzip-tar of `root` at `out`. `mtime` pins every entry timestamp
/// (0 when absent) for byte-stable archives.
pub fn create_archive(root: &Path, out: &Path, mtime: Option<u64>) -> Result<()> {
    let tmp = out.with_extension("tmp");
    let file = File::create(&tmp).map_err(|e| PeriscopeError::io("creating archive file", e))?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in walkdir::WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(std::result::Result::ok)
    {
        if entry.file_type().is_file() {
            paths.push(entry.path().to_path_buf());
        }
    }
    // walkdir sorts per directory; sort the flattened list for a stable
    // global order.
    paths.sort();

    for path in paths {
        let rel = path
            .strip_prefix(root)
            .map_err(|_| PeriscopeError::internal("archive entry escaped the bundle root"))?;
        let rel_str = rel.to_string_lossy().replace('\\', "/");
        if rel_str.starts_with(".tmp/") {
            continue;
        }

        let meta = path
            .metadata()
            .map_err(|e| PeriscopeError::io("reading archive entry metadata", e))?;
        let mut header = tar::Header::new_gnu();
        header.set_size(meta.len());
        header.set_mode(0o644);
        header.set_mtime(mtime.unwrap_or(0));

        let reader = BufReader::new(
            File::open(&path).map_err(|e| PeriscopeError::io("opening archive entry", e))?,
        );
        builder
            .append_data(&mut header, &rel_str, reader)
            .map_err(|e| PeriscopeError::io(format!("archiving {rel_str}"), e))?;
        debug!(entry = %rel_str, "archived");
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| PeriscopeError::io("finishing tar stream", e))?;
    encoder
        .finish()
        .map_err(|e| PeriscopeError::io("finishing gzip stream", e))?;

    std::fs::rename(&tmp, out).map_err(|e| PeriscopeError::io("renaming archive", e))?;
    info!(archive = %out.display(), "bundle archived");
    Ok(())
}

/// Extract a gzip-tar archive into `dest`.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive).map_err(|e| PeriscopeError::io("opening archive", e))?;
    let decoder = flate2::read::GzDecoder::new(BufReader::new(file));
    let mut reader = tar::Archive::new(decoder);
    reader
        .unpack(dest)
        .map_err(|e| PeriscopeError::io("extracting archive", e))?;
    Ok(())
}

/// Finalize a bundle store into an archive, then remove the work directory.
/// On archive failure the work directory is left intact for debugging.
pub async fn finalize(store: &BundleStore, out: &Path, mtime: Option<u64>) -> Result<()> {
    let root = store.root().to_path_buf();
    let out = out.to_path_buf();
    tokio::task::spawn_blocking(move || create_archive(&root, &out, mtime))
        .await
        .map_err(|e| PeriscopeError::internal(format!("archive task failed: {e}")))??;
    store.remove().await
}

/// Read access to an extracted bundle directory.
pub struct ExtractedBundle {
    root: PathBuf,
}

impl ExtractedBundle {
    /// Open an extracted bundle (or any bundle-shaped directory).
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Extract an archive into `scratch` and open the result.
    pub fn from_archive(archive: &Path, scratch: &Path) -> Result<Self> {
        extract_archive(archive, scratch)?;
        Ok(Self::open(scratch))
    }

    /// The extracted root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl BundleReader for ExtractedBundle {
    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let rel = normalize_path(path)?;
        std::fs::read(self.root.join(&rel))
            .map_err(|e| PeriscopeError::io(format!("reading bundle file {rel}"), e))
    }

    fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        glob_dir(&self.root, pattern)
    }
}
