use async_trait::async_trait;
use std::io::SeekFrom;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};

/// Random-access byte source; blocks may be read in any order and from
/// several tasks at once.
#[async_trait]
pub trait BlockReader: Send + Sync {
    async fn read_block(&self, range: Range<u64>) -> std::io::Result<Vec<u8>>;
}

fn block_len(range: &Range<u64>) -> std::io::Result<usize> {
    usize::try_from(range.end.saturating_sub(range.start)).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "block does not fit in memory")
    })
}

/// In-memory source.
#[derive(Debug, Clone)]
pub struct MemorySource {
    bytes: Arc<[u8]>,
}

impl MemorySource {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[async_trait]
impl BlockReader for MemorySource {
    async fn read_block(&self, range: Range<u64>) -> std::io::Result<Vec<u8>> {
        let start = usize::try_from(range.start).ok();
        let end = usize::try_from(range.end).ok();
        match (start, end) {
            (Some(start), Some(end)) if start <= end && end <= self.bytes.len() => {
                Ok(self.bytes[start..end].to_vec())
            }
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "block {}..{} is outside a {}-byte source",
                    range.start,
                    range.end,
                    self.bytes.len()
                ),
            )),
        }
    }
}

/// Local file read by seeking to each block.
#[derive(Debug)]
pub struct FileSource {
    file: tokio::sync::Mutex<tokio::fs::File>,
    len: u64,
}

impl FileSource {
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = tokio::fs::File::open(path.as_ref()).await?;
        let len = file.metadata().await?.len();
        Ok(Self {
            file: tokio::sync::Mutex::new(file),
            len,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[async_trait]
impl BlockReader for FileSource {
    async fn read_block(&self, range: Range<u64>) -> std::io::Result<Vec<u8>> {
        let mut buf = vec![0u8; block_len(&range)?];
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(range.start)).await?;
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

/// Bytes of one upload.
pub enum UploadSource {
    /// Random access; usable by both concurrency policies.
    RandomAccess(Arc<dyn BlockReader>),
    /// Consumed front to back; sequential policy only.
    Stream(Box<dyn AsyncRead + Send + Unpin>),
}

impl std::fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RandomAccess(_) => f.write_str("UploadSource::RandomAccess"),
            Self::Stream(_) => f.write_str("UploadSource::Stream"),
        }
    }
}

impl UploadSource {
    /// Random-access source over an in-memory buffer.
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::RandomAccess(Arc::new(MemorySource::new(bytes)))
    }

    /// Stream source; only the sequential policy accepts it.
    pub fn stream(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self::Stream(Box::new(reader))
    }

    /// Open a local file, returning the source and the file size.
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<(Self, u64)> {
        let file = FileSource::open(path).await?;
        let len = file.len();
        Ok((Self::RandomAccess(Arc::new(file)), len))
    }

    /// Read the next block. Streams must be read in block order.
    pub async fn next_block(&mut self, range: Range<u64>) -> std::io::Result<Vec<u8>> {
        match self {
            Self::RandomAccess(reader) => reader.read_block(range).await,
            Self::Stream(reader) => {
                let mut buf = vec![0u8; block_len(&range)?];
                reader.read_exact(&mut buf).await?;
                Ok(buf)
            }
        }
    }

    /// Fail if a stream still has bytes after its last block.
    pub async fn ensure_exhausted(&mut self) -> std::io::Result<()> {
        let Self::Stream(reader) = self else {
            return Ok(());
        };
        let mut extra = [0u8; 1];
        if reader.read(&mut extra).await? > 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "stream is longer than the announced upload size",
            ));
        }
        Ok(())
    }
}
