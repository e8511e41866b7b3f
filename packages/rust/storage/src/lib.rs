//! File-based artifact storage for downloaded protocols.
//!
//! The [`ArtifactStore`] owns one cache directory laid out as:
//!
//! - `<id:06>.list`: the list-page projection of a protocol
//! - `<id:06>.detail`: the enriched record, as returned by the API
//! - `checkpoint_<page:05>_<total:05>.json`: harvest progress
//!
//! Every write goes to a temp file in the same directory that is then renamed
//! over the target, so a crash never leaves a half-written artifact or
//! checkpoint behind.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

use protocolsio_shared::{Payload, Protocol, ProtocolsError, Result};

/// Extension of list-page projection files.
pub const LIST_EXTENSION: &str = "list";

/// Extension of enriched record files.
pub const DETAIL_EXTENSION: &str = "detail";

/// Handle on a cache directory of downloaded protocols.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open (creating if needed) the cache directory at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        create_private_dir(&root)?;
        Ok(Self { root })
    }

    #[cfg(test)]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<id:06>.list`
    pub fn list_filename(id: u64) -> String {
        format!("{id:06}.{LIST_EXTENSION}")
    }

    /// `<id:06>.detail`
    pub fn detail_filename(id: u64) -> String {
        format!("{id:06}.{DETAIL_EXTENSION}")
    }

    /// Atomically replace `filename` with `contents`.
    pub fn write(&self, filename: &str, contents: &[u8]) -> Result<PathBuf> {
        let target = self.root.join(filename);
        let mut tmp = NamedTempFile::new_in(&self.root).map_err(|e| ProtocolsError::io(&self.root, e))?;
        let fill = |tmp: &mut NamedTempFile| -> std::io::Result<()> {
            tmp.write_all(contents)?;
            tmp.flush()?;
            tmp.as_file().sync_all()
        };
        fill(&mut tmp).map_err(|e| ProtocolsError::io(tmp.path(), e))?;
        tmp.persist(&target)
            .map_err(|e| ProtocolsError::io(&target, e.error))?;
        debug!(path = %target.display(), bytes = contents.len(), "wrote artifact");
        Ok(target)
    }

    /// Atomically write `value` as a single line of JSON.
    pub fn write_json<T: Serialize>(&self, filename: &str, value: &T) -> Result<PathBuf> {
        let mut buf = serde_json::to_vec(value)
            .map_err(|e| ProtocolsError::decode(format!("{filename}: encode failed: {e}")))?;
        buf.push(b'\n');
        self.write(filename, &buf)
    }

    /// Read `filename`, or `None` if it does not exist.
    pub fn read(&self, filename: &str) -> Result<Option<Vec<u8>>> {
        let path = self.root.join(filename);
        match std::fs::read(&path) {
            Ok(buf) => Ok(Some(buf)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ProtocolsError::io(path, e)),
        }
    }

    /// Version of the stored enriched record for `id`, if there is one.
    pub fn stored_version(&self, id: u64) -> Result<Option<i64>> {
        let filename = Self::detail_filename(id);
        let Some(buf) = self.read(&filename)? else {
            return Ok(None);
        };
        let protocol = decode_detail(&buf, &self.root.join(&filename))?;
        Ok(Some(protocol.version_id))
    }
}

/// Decode the contents of a `.detail` file.
pub fn decode_detail(buf: &[u8], path: &Path) -> Result<Protocol> {
    serde_json::from_slice::<Payload<Protocol>>(buf)
        .map(|p| p.payload)
        .map_err(|e| ProtocolsError::decode(format!("{}: {e}", path.display())))
}

/// True for file names of enriched records.
pub fn is_detail_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| ext == DETAIL_EXTENSION)
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
        .map_err(|e| ProtocolsError::io(dir, e))
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| ProtocolsError::io(dir, e))
}
