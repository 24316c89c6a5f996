// Buffered entity queues over a blob store
//
// Blob layout: a sequence of zstd frames, one per flushed batch, each
// holding newline-delimited JSON entities. zstd readers decode concatenated
// frames transparently, so the reader never needs batch boundaries.

use super::blob::{BlobLocation, BlobStore, BlobWriter};
use crate::error::{Result, RetroError};
use crate::model::Entity;
use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};

/// Tuning for write queues
#[derive(Debug, Clone, Copy)]
pub struct QueueOptions {
    /// Entities buffered before a batch is flushed to the blob
    pub batch_size: usize,
    /// zstd compression level for each batch frame
    pub compression_level: i32,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            compression_level: 3,
        }
    }
}

/// Producer side: buffers entities and publishes them on `close`
pub struct WriteQueue {
    location: BlobLocation,
    sink: Option<Box<dyn BlobWriter>>,
    buffer: Vec<Entity>,
    options: QueueOptions,
    batches: usize,
    written: usize,
}

impl WriteQueue {
    pub fn open(store: &dyn BlobStore, location: BlobLocation, options: QueueOptions) -> Result<Self> {
        let sink = store.create(&location).map_err(|e| {
            e.with("region", &location.region)
                .with("container", &location.container)
                .with("path", &location.path)
        })?;

        Ok(Self {
            location,
            sink: Some(sink),
            buffer: Vec::with_capacity(options.batch_size.min(1024)),
            options,
            batches: 0,
            written: 0,
        })
    }

    pub fn location(&self) -> &BlobLocation {
        &self.location
    }

    pub fn write(&mut self, entity: Entity) -> Result<()> {
        self.buffer.push(entity);
        if self.buffer.len() >= self.options.batch_size.max(1) {
            self.flush()?;
        }
        Ok(())
    }

    /// Serialize the buffered entities as one batch frame
    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.write_frame().map_err(|e| self.annotate(e))?;
        self.written += self.buffer.len();
        self.buffer.clear();
        Ok(())
    }

    fn write_frame(&mut self) -> Result<()> {
        let mut lines = Vec::new();
        for entity in &self.buffer {
            serde_json::to_writer(&mut lines, entity).map_err(|e| RetroError::Json {
                source: e,
                context: "Failed to serialize entity".to_string(),
            })?;
            lines.push(b'\n');
        }

        let frame = zstd::encode_all(&lines[..], self.options.compression_level).map_err(|e| {
            RetroError::Io {
                source: e,
                context: "Failed to compress entity batch".to_string(),
            }
        })?;

        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| RetroError::Transport("Write queue already closed".to_string()))?;
        sink.write_all(&frame).map_err(|e| RetroError::Io {
            source: e,
            context: "Failed to write entity batch".to_string(),
        })?;

        tracing::debug!(
            "Flushed batch of {} entities ({} bytes) to {}",
            self.buffer.len(),
            frame.len(),
            self.location
        );
        self.batches += 1;
        Ok(())
    }

    /// Flush the remainder and publish the blob. Returns the entity count.
    pub fn close(mut self) -> Result<usize> {
        self.flush()?;

        // An empty frame keeps zero-entity blobs decodable
        if self.batches == 0 {
            self.write_frame().map_err(|e| self.annotate(e))?;
        }

        let sink = self
            .sink
            .take()
            .ok_or_else(|| RetroError::Transport("Write queue already closed".to_string()))?;
        sink.commit().map_err(|e| self.annotate(e))?;

        tracing::info!("Published {} entities to {}", self.written, self.location);
        Ok(self.written)
    }

    fn annotate(&self, e: RetroError) -> RetroError {
        e.with("region", &self.location.region)
            .with("container", &self.location.container)
            .with("path", &self.location.path)
            .with("pending", self.buffer.len())
    }
}

impl Drop for WriteQueue {
    fn drop(&mut self) {
        if self.sink.is_some() {
            tracing::warn!(
                "Write queue for {} dropped without close; {} entities discarded",
                self.location,
                self.written + self.buffer.len()
            );
        }
    }
}

/// Open a write queue, hand it to `f`, and close it on every exit path.
///
/// Entities written before `f` fails are still published. If `f` fails its
/// error wins; a close failure on that path is attached as `close_error`.
pub fn with_write_queue<T>(
    store: &dyn BlobStore,
    location: BlobLocation,
    options: QueueOptions,
    f: impl FnOnce(&mut WriteQueue) -> Result<T>,
) -> Result<T> {
    let mut queue = WriteQueue::open(store, location, options)?;
    match f(&mut queue) {
        Ok(value) => {
            queue.close()?;
            Ok(value)
        }
        Err(e) => match queue.close() {
            Ok(_) => Err(e),
            Err(close_err) => Err(e.with("close_error", close_err)),
        },
    }
}

type FrameDecoder =
    zstd::stream::read::Decoder<'static, BufReader<SourceReader<Box<dyn Read + Send>>>>;

/// Tags errors raised by the blob itself so they can be told apart from
/// decode failures once they surface through the decoder.
struct SourceReader<R>(R);

impl<R: Read> Read for SourceReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0
            .read(buf)
            .map_err(|e| io::Error::new(e.kind(), SourceError(e)))
    }
}

#[derive(Debug)]
struct SourceError(io::Error);

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

/// Reader failures are transport errors; anything else is a corrupt batch
fn classify_read_error(e: io::Error) -> RetroError {
    let from_source = e
        .get_ref()
        .map_or(false, |inner| inner.is::<SourceError>());
    if from_source {
        RetroError::Io {
            source: e,
            context: "Failed to read entity batch".to_string(),
        }
    } else {
        RetroError::Parse(format!("Corrupt entity batch: {}", e))
    }
}

/// Consumer side: a forward-only, non-restartable stream of entities
pub struct ReadQueue {
    location: BlobLocation,
    lines: std::io::Lines<BufReader<FrameDecoder>>,
    line_no: usize,
    done: bool,
}

impl ReadQueue {
    pub fn open(store: &dyn BlobStore, location: BlobLocation) -> Result<Self> {
        let reader = store.open(&location).map_err(|e| {
            e.with("region", &location.region)
                .with("container", &location.container)
                .with("path", &location.path)
        })?;
        let decoder =
            zstd::stream::read::Decoder::new(SourceReader(reader)).map_err(|e| RetroError::Io {
                source: e,
                context: format!("Failed to initialize decoder for {}", location),
            })?;

        Ok(Self {
            location,
            lines: BufReader::new(decoder).lines(),
            line_no: 0,
            done: false,
        })
    }

    pub fn location(&self) -> &BlobLocation {
        &self.location
    }

    /// Pull up to `max` entities; an empty batch means the stream is exhausted
    pub fn next_batch(&mut self, max: usize) -> Result<Vec<Entity>> {
        let mut batch = Vec::new();
        while batch.len() < max.max(1) {
            match self.next() {
                Some(entity) => batch.push(entity?),
                None => break,
            }
        }
        Ok(batch)
    }

    fn fail(&mut self, e: RetroError) -> RetroError {
        self.done = true;
        e.with("region", &self.location.region)
            .with("container", &self.location.container)
            .with("path", &self.location.path)
            .with("line", self.line_no)
    }
}

impl Iterator for ReadQueue {
    type Item = Result<Entity>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    let err = classify_read_error(e);
                    return Some(Err(self.fail(err)));
                }
            };
            self.line_no += 1;

            if line.trim().is_empty() {
                continue;
            }

            return Some(serde_json::from_str::<Entity>(&line).map_err(|e| {
                self.fail(RetroError::Parse(format!("Malformed entity record: {}", e)))
            }));
        }
        None
    }
}
