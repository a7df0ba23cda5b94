use crate::error::Error;
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// An image written to disk for the lifetime of one recognition.
///
/// The file is removed exactly once, when the guard is released or
/// dropped. Removal failures are logged and otherwise ignored.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    pub async fn save(dir: &Path, bytes: &[u8]) -> Result<ScratchFile, Error> {
        let name = format!("plate-{:x}.jpg", Uuid::new_v4().to_simple());
        let path = dir.join(name);
        if let Err(e) = tokio::fs::write(&path, bytes).await {
            // Don't leave a truncated file behind.
            let _ = fs::remove_file(&path);
            return Err(Error::Scratch(e));
        }
        debug!("Wrote {} bytes to {:?}", bytes.len(), path);
        Ok(ScratchFile { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(self) {}
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        // Drop can't await; unlinking one small file is cheap enough to do
        // inline on the worker thread.
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed {:?}", self.path),
            Err(e) => warn!("Unable to remove scratch file {:?}: {}", self.path, e),
        }
    }
}
