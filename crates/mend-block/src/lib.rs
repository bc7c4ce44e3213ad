#![forbid(unsafe_code)]
//! Block I/O layer.
//!
//! Provides the `ByteDevice`/`BlockDevice` traits, a file-backed device
//! using pread/pwrite semantics, the byte-to-block adapter with bounds and
//! size checks, and an in-memory device for tests. The checker treats any
//! error from this layer as fatal: a volume that cannot be read or written
//! reliably must not receive repairs.

use mend_error::{MendError, Result};
use mend_types::BlockNumber;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

/// Owned block buffer.
///
/// Invariant: length == device block size for the originating device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBuf {
    bytes: Vec<u8>,
}

impl BlockBuf {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

/// Byte-addressed device for fixed-offset I/O (pread/pwrite semantics).
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write all bytes in `buf` to `offset`.
    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;
}

/// File-backed byte device using Linux `pread`/`pwrite` style I/O.
///
/// This uses `std::os::unix::fs::FileExt`, which is thread-safe and does not
/// require a shared seek position. Opens read-write when possible, falling
/// back to read-only (writes then fail with `PermissionDenied`-class I/O).
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
    len: u64,
    writable: bool,
}

impl FileByteDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let (file, writable) = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .map(|file| (file, true))
            .or_else(|_| {
                OpenOptions::new()
                    .read(true)
                    .open(path.as_ref())
                    .map(|file| (file, false))
            })?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            len,
            writable,
        })
    }

    #[must_use]
    pub fn writable(&self) -> bool {
        self.writable
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let end = offset
            .checked_add(
                u64::try_from(buf.len())
                    .map_err(|_| MendError::Format("read length overflows u64".to_owned()))?,
            )
            .ok_or_else(|| MendError::Format("read range overflows u64".to_owned()))?;
        if end > self.len {
            return Err(MendError::Format(format!(
                "read out of bounds: offset={offset} len={} file_len={}",
                buf.len(),
                self.len
            )));
        }

        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(MendError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "device opened read-only",
            )));
        }
        let end = offset
            .checked_add(
                u64::try_from(buf.len())
                    .map_err(|_| MendError::Format("write length overflows u64".to_owned()))?,
            )
            .ok_or_else(|| MendError::Format("write range overflows u64".to_owned()))?;
        if end > self.len {
            return Err(MendError::Format(format!(
                "write out of bounds: offset={offset} len={} file_len={}",
                buf.len(),
                self.len
            )));
        }

        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Block-addressed I/O interface — the storage collaborator of the checker.
pub trait BlockDevice: Send + Sync {
    /// Read a block by number.
    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf>;

    /// Write a block by number. `data.len()` MUST equal `block_size()`.
    fn write_block(&self, block: BlockNumber, data: &[u8]) -> Result<()>;

    /// Device block size in bytes.
    fn block_size(&self) -> u32;

    /// Total number of blocks.
    fn block_count(&self) -> u64;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;
}

/// Adapter exposing a `ByteDevice` as a `BlockDevice` of fixed-size blocks.
#[derive(Debug)]
pub struct ByteBlockDevice<D: ByteDevice> {
    inner: D,
    block_size: u32,
    block_count: u64,
}

impl<D: ByteDevice> ByteBlockDevice<D> {
    pub fn new(inner: D, block_size: u32) -> Result<Self> {
        if block_size == 0 || !block_size.is_power_of_two() {
            return Err(MendError::Format(format!(
                "invalid block_size={block_size} (must be power of two)"
            )));
        }

        let len = inner.len_bytes();
        let block_size_u64 = u64::from(block_size);
        let remainder = len % block_size_u64;
        if remainder != 0 {
            return Err(MendError::Format(format!(
                "image length is not block-aligned: len_bytes={len} block_size={block_size} remainder={remainder}"
            )));
        }
        let block_count = len / block_size_u64;
        Ok(Self {
            inner,
            block_size,
            block_count,
        })
    }

    #[must_use]
    pub fn inner(&self) -> &D {
        &self.inner
    }
}

impl<D: ByteDevice> BlockDevice for ByteBlockDevice<D> {
    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        if block.0 >= self.block_count {
            return Err(MendError::Format(format!(
                "block out of range: block={} block_count={}",
                block.0, self.block_count
            )));
        }

        let offset = block
            .0
            .checked_mul(u64::from(self.block_size))
            .ok_or_else(|| MendError::Format("block offset overflow".to_owned()))?;
        let mut buf = vec![
            0_u8;
            usize::try_from(self.block_size).map_err(|_| {
                MendError::Format("block_size does not fit usize".to_owned())
            })?
        ];
        self.inner.read_exact_at(offset, &mut buf)?;
        Ok(BlockBuf::new(buf))
    }

    fn write_block(&self, block: BlockNumber, data: &[u8]) -> Result<()> {
        let expected = usize::try_from(self.block_size)
            .map_err(|_| MendError::Format("block_size does not fit usize".to_owned()))?;
        if data.len() != expected {
            return Err(MendError::Format(format!(
                "write_block data size mismatch: got={} expected={expected}",
                data.len()
            )));
        }
        if block.0 >= self.block_count {
            return Err(MendError::Format(format!(
                "block out of range: block={} block_count={}",
                block.0, self.block_count
            )));
        }

        let offset = block
            .0
            .checked_mul(u64::from(self.block_size))
            .ok_or_else(|| MendError::Format("block offset overflow".to_owned()))?;
        self.inner.write_all_at(offset, data)?;
        Ok(())
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn sync(&self) -> Result<()> {
        self.inner.sync()
    }
}

/// In-memory block device.
///
/// Backs the test suites of every crate in the workspace; also counts writes
/// and syncs so tests can assert the "zero writes on fatal" guarantee.
/// Unwritten blocks read as zeroes.
#[derive(Debug)]
pub struct MemBlockDevice {
    blocks: Mutex<HashMap<u64, Vec<u8>>>,
    block_size: u32,
    block_count: u64,
    writes: Mutex<u64>,
    syncs: Mutex<u64>,
}

impl MemBlockDevice {
    #[must_use]
    pub fn new(block_size: u32, block_count: u64) -> Self {
        Self {
            blocks: Mutex::new(HashMap::new()),
            block_size,
            block_count,
            writes: Mutex::new(0),
            syncs: Mutex::new(0),
        }
    }

    /// Build a device from a flat image. The image length must be a
    /// multiple of `block_size`.
    pub fn from_image(block_size: u32, image: &[u8]) -> Result<Self> {
        let bs = usize::try_from(block_size)
            .map_err(|_| MendError::Format("block_size does not fit usize".to_owned()))?;
        if bs == 0 || image.len() % bs != 0 {
            return Err(MendError::Format(format!(
                "image length {} is not a multiple of block_size {block_size}",
                image.len()
            )));
        }
        let device = Self::new(block_size, (image.len() / bs) as u64);
        {
            let mut blocks = device.blocks.lock();
            for (idx, chunk) in image.chunks_exact(bs).enumerate() {
                if chunk.iter().any(|b| *b != 0) {
                    blocks.insert(idx as u64, chunk.to_vec());
                }
            }
        }
        Ok(device)
    }

    /// Number of `write_block` calls accepted so far.
    #[must_use]
    pub fn writes(&self) -> u64 {
        *self.writes.lock()
    }

    /// Number of `sync` calls so far.
    #[must_use]
    pub fn syncs(&self) -> u64 {
        *self.syncs.lock()
    }

    /// Flatten the device back into an image (for byte-identity assertions).
    #[must_use]
    pub fn to_image(&self) -> Vec<u8> {
        let bs = self.block_size as usize;
        let mut image = vec![0_u8; bs * usize::try_from(self.block_count).unwrap_or(0)];
        let blocks = self.blocks.lock();
        for (idx, data) in blocks.iter() {
            let start = usize::try_from(*idx).unwrap_or(0) * bs;
            image[start..start + bs].copy_from_slice(data);
        }
        image
    }
}

impl BlockDevice for MemBlockDevice {
    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        if block.0 >= self.block_count {
            return Err(MendError::Format(format!(
                "read out of range: block={} block_count={}",
                block.0, self.block_count
            )));
        }
        let bytes = self
            .blocks
            .lock()
            .get(&block.0)
            .cloned()
            .unwrap_or_else(|| vec![0_u8; self.block_size as usize]);
        Ok(BlockBuf::new(bytes))
    }

    fn write_block(&self, block: BlockNumber, data: &[u8]) -> Result<()> {
        if block.0 >= self.block_count {
            return Err(MendError::Format(format!(
                "write out of range: block={} block_count={}",
                block.0, self.block_count
            )));
        }
        if data.len() != self.block_size as usize {
            return Err(MendError::Format(format!(
                "write size mismatch: got={} expected={}",
                data.len(),
                self.block_size
            )));
        }
        self.blocks.lock().insert(block.0, data.to_vec());
        *self.writes.lock() += 1;
        Ok(())
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn sync(&self) -> Result<()> {
        *self.syncs.lock() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn mem_device_round_trip() {
        let device = MemBlockDevice::new(512, 8);
        let data = vec![0xAB_u8; 512];
        device.write_block(BlockNumber(3), &data).expect("write");
        let read = device.read_block(BlockNumber(3)).expect("read");
        assert_eq!(read.as_slice(), data.as_slice());
        assert_eq!(device.writes(), 1);

        // Unwritten blocks read as zeroes.
        let zero = device.read_block(BlockNumber(0)).expect("read");
        assert!(zero.as_slice().iter().all(|b| *b == 0));
    }

    #[test]
    fn mem_device_bounds_and_size_checks() {
        let device = MemBlockDevice::new(512, 4);
        assert!(device.read_block(BlockNumber(4)).is_err());
        assert!(device.write_block(BlockNumber(4), &[0_u8; 512]).is_err());
        assert!(device.write_block(BlockNumber(0), &[0_u8; 100]).is_err());
        assert_eq!(device.writes(), 0);
    }

    #[test]
    fn mem_device_image_round_trip() {
        let mut image = vec![0_u8; 2048];
        image[600] = 0x5A;
        let device = MemBlockDevice::from_image(512, &image).expect("from_image");
        assert_eq!(device.block_count(), 4);
        assert_eq!(device.read_block(BlockNumber(1)).expect("read").as_slice()[88], 0x5A);
        assert_eq!(device.to_image(), image);
    }

    #[test]
    fn mem_device_rejects_unaligned_image() {
        assert!(MemBlockDevice::from_image(512, &[0_u8; 100]).is_err());
    }

    #[test]
    fn byte_block_adapter_checks_geometry() {
        let device = MemByteDevice::new(4096);
        assert!(ByteBlockDevice::new(MemByteDevice::new(4096), 0).is_err());
        assert!(ByteBlockDevice::new(MemByteDevice::new(4096), 300).is_err());
        assert!(ByteBlockDevice::new(MemByteDevice::new(4000), 512).is_err());

        let blocks = ByteBlockDevice::new(device, 512).expect("adapter");
        assert_eq!(blocks.block_count(), 8);
        assert_eq!(blocks.block_size(), 512);
    }

    #[test]
    fn byte_block_adapter_round_trip_and_bounds() {
        let blocks = ByteBlockDevice::new(MemByteDevice::new(2048), 512).expect("adapter");
        let data = vec![0x17_u8; 512];
        blocks.write_block(BlockNumber(2), &data).expect("write");
        assert_eq!(blocks.read_block(BlockNumber(2)).expect("read").as_slice(), data.as_slice());

        assert!(blocks.read_block(BlockNumber(4)).is_err());
        assert!(blocks.write_block(BlockNumber(0), &[0_u8; 511]).is_err());
    }

    #[test]
    fn file_device_round_trip() {
        let mut tmp = tempfile::NamedTempFile::new().expect("tempfile");
        tmp.write_all(&vec![0_u8; 4096]).expect("fill");
        tmp.flush().expect("flush");

        let device = FileByteDevice::open(tmp.path()).expect("open");
        assert!(device.writable());
        assert_eq!(device.len_bytes(), 4096);

        device.write_all_at(1024, &[1, 2, 3, 4]).expect("write");
        let mut buf = [0_u8; 4];
        device.read_exact_at(1024, &mut buf).expect("read");
        assert_eq!(buf, [1, 2, 3, 4]);
        device.sync().expect("sync");

        // Out of bounds in both directions.
        assert!(device.read_exact_at(4093, &mut buf).is_err());
        assert!(device.write_all_at(4093, &buf).is_err());
    }

    /// Minimal in-memory ByteDevice for the adapter tests.
    #[derive(Debug)]
    struct MemByteDevice {
        bytes: Mutex<Vec<u8>>,
    }

    impl MemByteDevice {
        fn new(len: usize) -> Self {
            Self {
                bytes: Mutex::new(vec![0_u8; len]),
            }
        }
    }

    impl ByteDevice for MemByteDevice {
        fn len_bytes(&self) -> u64 {
            self.bytes.lock().len() as u64
        }

        fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
            let bytes = self.bytes.lock();
            let start = usize::try_from(offset)
                .map_err(|_| MendError::Format("offset does not fit usize".to_owned()))?;
            let end = start
                .checked_add(buf.len())
                .filter(|end| *end <= bytes.len())
                .ok_or_else(|| MendError::Format("read out of bounds".to_owned()))?;
            buf.copy_from_slice(&bytes[start..end]);
            Ok(())
        }

        fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
            let mut bytes = self.bytes.lock();
            let start = usize::try_from(offset)
                .map_err(|_| MendError::Format("offset does not fit usize".to_owned()))?;
            let end = start
                .checked_add(buf.len())
                .filter(|end| *end <= bytes.len())
                .ok_or_else(|| MendError::Format("write out of bounds".to_owned()))?;
            bytes[start..end].copy_from_slice(buf);
            Ok(())
        }

        fn sync(&self) -> Result<()> {
            Ok(())
        }
    }
}
