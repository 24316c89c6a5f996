//! Addressable blob storage behind the entity transport
//!
//! Blobs are addressed by a `(region, container, path)` triple and become
//! visible only when their writer is committed. The filesystem store shards
//! objects by a BLAKE3 digest of the address, so arbitrary object keys never
//! become filesystem paths.

use crate::error::{Result, RetroError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Three-part blob address shared verbatim by writer, trigger and reader
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobLocation {
    pub region: String,
    pub container: String,
    pub path: String,
}

impl BlobLocation {
    pub fn new(
        region: impl Into<String>,
        container: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            container: container.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for BlobLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.region, self.container, self.path)
    }
}

/// Pending object; nothing is visible at the location until `commit`
pub trait BlobWriter: Write + Send {
    fn commit(self: Box<Self>) -> Result<()>;
}

pub trait BlobStore: Send + Sync {
    /// Start a new object at `location`, replacing any existing one on commit
    fn create(&self, location: &BlobLocation) -> Result<Box<dyn BlobWriter>>;

    fn open(&self, location: &BlobLocation) -> Result<Box<dyn Read + Send>>;

    fn exists(&self, location: &BlobLocation) -> bool;
}

/// Filesystem blob store
pub struct FsBlobStore {
    base_path: PathBuf,
}

impl FsBlobStore {
    /// Create a new blob store at the given base path
    pub fn new(base_path: PathBuf) -> Result<Self> {
        let blobs_dir = base_path.join("blobs");
        fs::create_dir_all(&blobs_dir).map_err(|e| RetroError::Io {
            source: e,
            context: format!("Failed to create blobs directory: {}", blobs_dir.display()),
        })?;

        Ok(Self { base_path })
    }

    /// Digest of the address; NUL separators keep `a/b` + `c` distinct from `a` + `b/c`
    fn address_hash(location: &BlobLocation) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(location.region.as_bytes());
        hasher.update(b"\0");
        hasher.update(location.container.as_bytes());
        hasher.update(b"\0");
        hasher.update(location.path.as_bytes());
        format!("{:.32}", hasher.finalize().to_hex())
    }

    /// Two-level sharding: blobs/ab/cd/abcdef123456...
    fn blob_path(&self, hash: &str) -> PathBuf {
        let shard1 = &hash[0..2];
        let shard2 = &hash[2..4];
        self.base_path
            .join("blobs")
            .join(shard1)
            .join(shard2)
            .join(hash)
    }
}

impl BlobStore for FsBlobStore {
    fn create(&self, location: &BlobLocation) -> Result<Box<dyn BlobWriter>> {
        let final_path = self.blob_path(&Self::address_hash(location));
        let parent = final_path
            .parent()
            .ok_or_else(|| RetroError::Config("Invalid blob path".to_string()))?;
        fs::create_dir_all(parent).map_err(|e| RetroError::Io {
            source: e,
            context: format!("Failed to create blob parent directory: {}", parent.display()),
        })?;

        // Unique temp name so concurrent writers to one address never collide
        let temp_path = final_path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));
        let file = fs::File::create(&temp_path).map_err(|e| RetroError::Io {
            source: e,
            context: format!("Failed to create temp blob file: {}", temp_path.display()),
        })?;

        Ok(Box::new(FsBlobWriter {
            file: Some(file),
            temp_path,
            final_path,
            committed: false,
        }))
    }

    fn open(&self, location: &BlobLocation) -> Result<Box<dyn Read + Send>> {
        let blob_path = self.blob_path(&Self::address_hash(location));
        let file = fs::File::open(&blob_path).map_err(|e| RetroError::Io {
            source: e,
            context: format!("Failed to open blob {}", location),
        })?;
        Ok(Box::new(file))
    }

    fn exists(&self, location: &BlobLocation) -> bool {
        self.blob_path(&Self::address_hash(location)).exists()
    }
}

struct FsBlobWriter {
    file: Option<fs::File>,
    temp_path: PathBuf,
    final_path: PathBuf,
    committed: bool,
}

impl Write for FsBlobWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.write(buf),
            None => Err(io::Error::new(io::ErrorKind::Other, "blob writer already committed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl BlobWriter for FsBlobWriter {
    fn commit(mut self: Box<Self>) -> Result<()> {
        let file = self
            .file
            .take()
            .ok_or_else(|| RetroError::Transport("Blob writer already committed".to_string()))?;

        file.sync_all().map_err(|e| RetroError::Io {
            source: e,
            context: format!("Failed to sync blob file: {}", self.temp_path.display()),
        })?;
        drop(file);

        fs::rename(&self.temp_path, &self.final_path).map_err(|e| RetroError::Io {
            source: e,
            context: format!(
                "Failed to rename temp blob to final location: {} -> {}",
                self.temp_path.display(),
                self.final_path.display()
            ),
        })?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for FsBlobWriter {
    fn drop(&mut self) {
        // Anything short of a successful rename leaves the staging file behind
        if !self.committed {
            self.file.take();
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}

/// In-memory blob store; clones share the same objects
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<Mutex<HashMap<BlobLocation, Vec<u8>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<BlobLocation, Vec<u8>>>> {
        self.objects
            .lock()
            .map_err(|_| RetroError::Transport("Blob store lock poisoned".to_string()))
    }
}

impl BlobStore for MemoryBlobStore {
    fn create(&self, location: &BlobLocation) -> Result<Box<dyn BlobWriter>> {
        Ok(Box::new(MemoryBlobWriter {
            objects: Arc::clone(&self.objects),
            location: location.clone(),
            buffer: Vec::new(),
        }))
    }

    fn open(&self, location: &BlobLocation) -> Result<Box<dyn Read + Send>> {
        let objects = self.lock()?;
        let data = objects
            .get(location)
            .cloned()
            .ok_or_else(|| RetroError::Transport(format!("Blob not found: {}", location)))?;
        Ok(Box::new(io::Cursor::new(data)))
    }

    fn exists(&self, location: &BlobLocation) -> bool {
        self.objects
            .lock()
            .map(|o| o.contains_key(location))
            .unwrap_or(false)
    }
}

struct MemoryBlobWriter {
    objects: Arc<Mutex<HashMap<BlobLocation, Vec<u8>>>>,
    location: BlobLocation,
    buffer: Vec<u8>,
}

impl Write for MemoryBlobWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl BlobWriter for MemoryBlobWriter {
    fn commit(self: Box<Self>) -> Result<()> {
        let MemoryBlobWriter {
            objects,
            location,
            buffer,
        } = *self;
        objects
            .lock()
            .map_err(|_| RetroError::Transport("Blob store lock poisoned".to_string()))?
            .insert(location, buffer);
        Ok(())
    }
}
