#![forbid(unsafe_code)]
//! Sector I/O layer.
//!
//! Provides the `SectorDevice` trait the filesystem engine consumes, and
//! byte-addressed backends (file image, in-memory image) adapted to it by
//! [`ByteSectorDevice`]. Every call is synchronous and either completes or
//! returns an error; nothing is retried.

use parking_lot::Mutex;
use std::fs::File;
use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use t2fs_error::{Result, T2fsError};
use t2fs_types::{SECTOR_SIZE, SectorNumber};
use tracing::trace;

/// Owned sector buffer.
///
/// Invariant: length == [`SECTOR_SIZE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorBuf {
    bytes: [u8; SECTOR_SIZE],
}

impl SectorBuf {
    #[must_use]
    pub fn zeroed() -> Self {
        Self {
            bytes: [0_u8; SECTOR_SIZE],
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Default for SectorBuf {
    fn default() -> Self {
        Self::zeroed()
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

fn checked_range(offset: u64, len: usize, dev_len: u64, op: &str) -> Result<()> {
    let end = u64::try_from(len)
        .ok()
        .and_then(|len| offset.checked_add(len))
        .ok_or_else(|| T2fsError::Device {
            sector: offset / SECTOR_SIZE as u64,
            detail: format!("{op} range overflows u64"),
        })?;
    if end > dev_len {
        return Err(T2fsError::Device {
            sector: offset / SECTOR_SIZE as u64,
            detail: format!("{op} out of bounds: offset={offset} len={len} device_len={dev_len}"),
        });
    }
    Ok(())
}

/// File-backed byte device using `pread`/`pwrite` style I/O.
///
/// Opens read-write when permitted, otherwise read-only; writes to a
/// read-only image fail.
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

    /// Create (or truncate) an image file of `len` zero bytes.
    pub fn create(path: impl AsRef<Path>, len: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        file.set_len(len)?;
        Ok(Self {
            file: Arc::new(file),
            len,
            writable: true,
        })
    }

    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writable
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        checked_range(offset, buf.len(), self.len, "read")?;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(T2fsError::Device {
                sector: offset / SECTOR_SIZE as u64,
                detail: "image opened read-only".to_owned(),
            });
        }
        checked_range(offset, buf.len(), self.len, "write")?;
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// In-memory byte device; the usual backend for tests and scratch images.
#[derive(Debug)]
pub struct MemoryByteDevice {
    bytes: Mutex<Vec<u8>>,
}

impl MemoryByteDevice {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            bytes: Mutex::new(vec![0_u8; len]),
        }
    }

    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Mutex::new(bytes),
        }
    }

    /// Copy of the whole image.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }
}

impl ByteDevice for MemoryByteDevice {
    fn len_bytes(&self) -> u64 {
        u64::try_from(self.bytes.lock().len()).unwrap_or(0)
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let bytes = self.bytes.lock();
        checked_range(offset, buf.len(), bytes.len() as u64, "read")?;
        let start = usize::try_from(offset).map_err(|_| T2fsError::Device {
            sector: offset / SECTOR_SIZE as u64,
            detail: "offset does not fit usize".to_owned(),
        })?;
        buf.copy_from_slice(&bytes[start..start + buf.len()]);
        drop(bytes);
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut bytes = self.bytes.lock();
        checked_range(offset, buf.len(), bytes.len() as u64, "write")?;
        let start = usize::try_from(offset).map_err(|_| T2fsError::Device {
            sector: offset / SECTOR_SIZE as u64,
            detail: "offset does not fit usize".to_owned(),
        })?;
        bytes[start..start + buf.len()].copy_from_slice(buf);
        drop(bytes);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// Sector-addressed I/O interface consumed by the filesystem engine.
pub trait SectorDevice: Send + Sync {
    /// Read one sector by logical index.
    fn read_sector(&self, sector: SectorNumber) -> Result<SectorBuf>;

    /// Write one sector. `data.len()` MUST equal [`SECTOR_SIZE`].
    fn write_sector(&self, sector: SectorNumber, data: &[u8]) -> Result<()>;

    /// Total number of sectors.
    fn sector_count(&self) -> u64;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;
}

impl<T: SectorDevice + ?Sized> SectorDevice for &T {
    fn read_sector(&self, sector: SectorNumber) -> Result<SectorBuf> {
        (**self).read_sector(sector)
    }

    fn write_sector(&self, sector: SectorNumber, data: &[u8]) -> Result<()> {
        (**self).write_sector(sector, data)
    }

    fn sector_count(&self) -> u64 {
        (**self).sector_count()
    }

    fn sync(&self) -> Result<()> {
        (**self).sync()
    }
}

impl<T: SectorDevice + ?Sized> SectorDevice for Box<T> {
    fn read_sector(&self, sector: SectorNumber) -> Result<SectorBuf> {
        (**self).read_sector(sector)
    }

    fn write_sector(&self, sector: SectorNumber, data: &[u8]) -> Result<()> {
        (**self).write_sector(sector, data)
    }

    fn sector_count(&self) -> u64 {
        (**self).sector_count()
    }

    fn sync(&self) -> Result<()> {
        (**self).sync()
    }
}

/// Adapts a [`ByteDevice`] to fixed-size sectors.
#[derive(Debug)]
pub struct ByteSectorDevice<D: ByteDevice> {
    inner: D,
    sector_count: u64,
}

impl<D: ByteDevice> ByteSectorDevice<D> {
    pub fn new(inner: D) -> Result<Self> {
        let len = inner.len_bytes();
        let sector_size = SECTOR_SIZE as u64;
        let remainder = len % sector_size;
        if remainder != 0 {
            return Err(T2fsError::InvalidGeometry(format!(
                "image length is not sector-aligned: len_bytes={len} sector_size={sector_size} remainder={remainder}"
            )));
        }
        Ok(Self {
            inner,
            sector_count: len / sector_size,
        })
    }

    #[must_use]
    pub fn inner(&self) -> &D {
        &self.inner
    }

    fn offset_of(&self, sector: SectorNumber) -> Result<u64> {
        if sector.0 >= self.sector_count {
            return Err(T2fsError::Device {
                sector: sector.0,
                detail: format!("sector out of range: sector_count={}", self.sector_count),
            });
        }
        sector
            .0
            .checked_mul(SECTOR_SIZE as u64)
            .ok_or_else(|| T2fsError::Device {
                sector: sector.0,
                detail: "sector offset overflow".to_owned(),
            })
    }
}

impl ByteSectorDevice<MemoryByteDevice> {
    /// Zeroed in-memory device of `sector_count` sectors.
    #[must_use]
    pub fn in_memory(sector_count: usize) -> Self {
        Self {
            inner: MemoryByteDevice::new(sector_count * SECTOR_SIZE),
            sector_count: sector_count as u64,
        }
    }
}

impl<D: ByteDevice> SectorDevice for ByteSectorDevice<D> {
    fn read_sector(&self, sector: SectorNumber) -> Result<SectorBuf> {
        let offset = self.offset_of(sector)?;
        let mut buf = SectorBuf::zeroed();
        self.inner.read_exact_at(offset, buf.as_mut_slice())?;
        trace!(sector = sector.0, "read_sector");
        Ok(buf)
    }

    fn write_sector(&self, sector: SectorNumber, data: &[u8]) -> Result<()> {
        if data.len() != SECTOR_SIZE {
            return Err(T2fsError::Device {
                sector: sector.0,
                detail: format!(
                    "write_sector data size mismatch: got={} expected={SECTOR_SIZE}",
                    data.len()
                ),
            });
        }
        let offset = self.offset_of(sector)?;
        self.inner.write_all_at(offset, data)?;
        trace!(sector = sector.0, "write_sector");
        Ok(())
    }

    fn sector_count(&self) -> u64 {
        self.sector_count
    }

    fn sync(&self) -> Result<()> {
        self.inner.sync()
    }
}
