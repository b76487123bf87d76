#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use t2fs_block::{ByteSectorDevice, MemoryByteDevice, SectorBuf, SectorDevice};
use t2fs_core::{FormatOptions, T2fs, T2fsError, format};
use t2fs_error::Result;
use t2fs_types::SectorNumber;

/// Wraps a device and fails reads or writes at or beyond a sector threshold.
#[derive(Debug)]
struct FaultyDevice<'a> {
    inner: &'a ByteSectorDevice<MemoryByteDevice>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    from_sector: AtomicU64,
    writes: AtomicU64,
}

impl<'a> FaultyDevice<'a> {
    fn new(inner: &'a ByteSectorDevice<MemoryByteDevice>) -> Self {
        Self {
            inner,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            from_sector: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    fn trips(&self, flag: &AtomicBool, sector: SectorNumber) -> bool {
        flag.load(Ordering::SeqCst) && sector.0 >= self.from_sector.load(Ordering::SeqCst)
    }
}

impl SectorDevice for FaultyDevice<'_> {
    fn read_sector(&self, sector: SectorNumber) -> Result<SectorBuf> {
        if self.trips(&self.fail_reads, sector) {
            return Err(t2fs_error::T2fsError::Device {
                sector: sector.0,
                detail: "injected read failure".to_owned(),
            });
        }
        self.inner.read_sector(sector)
    }

    fn write_sector(&self, sector: SectorNumber, data: &[u8]) -> Result<()> {
        if self.trips(&self.fail_writes, sector) {
            return Err(t2fs_error::T2fsError::Device {
                sector: sector.0,
                detail: "injected write failure".to_owned(),
            });
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write_sector(sector, data)
    }

    fn sector_count(&self) -> u64 {
        self.inner.sector_count()
    }

    fn sync(&self) -> Result<()> {
        self.inner.sync()
    }
}

fn formatted() -> ByteSectorDevice<MemoryByteDevice> {
    let dev = ByteSectorDevice::in_memory(1024);
    format(&dev, &FormatOptions::default()).expect("format");
    dev
}

#[test]
fn unreadable_superblock_is_corrupt_superblock() {
    let dev = formatted();
    let faulty = FaultyDevice::new(&dev);
    faulty.fail_reads.store(true, Ordering::SeqCst);
    assert!(matches!(
        T2fs::mount(&faulty),
        Err(T2fsError::CorruptSuperblock(_))
    ));
}

#[test]
fn fat_read_failure_surfaces_as_device_error() {
    let dev = formatted();
    let faulty = FaultyDevice::new(&dev);
    let mut fs = T2fs::mount(&faulty).unwrap();
    faulty.fail_reads.store(true, Ordering::SeqCst);
    faulty.from_sector.store(1, Ordering::SeqCst);
    assert!(matches!(
        fs.create("/f"),
        Err(T2fsError::Device { .. })
    ));
}

#[test]
fn data_write_failure_is_reported_and_not_retried() {
    let dev = formatted();
    let faulty = FaultyDevice::new(&dev);
    let mut fs = T2fs::mount(&faulty).unwrap();
    let fh = fs.create("/f").unwrap();
    fs.write(fh, b"before").unwrap();

    let data_start = u64::from(fs.superblock().data_sector_start);
    faulty.from_sector.store(data_start, Ordering::SeqCst);
    faulty.fail_writes.store(true, Ordering::SeqCst);
    let writes = faulty.writes.load(Ordering::SeqCst);
    assert!(matches!(
        fs.write(fh, b"after"),
        Err(T2fsError::Device { .. })
    ));
    assert_eq!(faulty.writes.load(Ordering::SeqCst), writes);

    faulty.fail_writes.store(false, Ordering::SeqCst);
    // The failed write never reached the record: size is unchanged.
    assert_eq!(fs.stat("/f").unwrap().size, 6);
}

#[test]
fn directory_read_failure_fails_lookup() {
    let dev = formatted();
    let faulty = FaultyDevice::new(&dev);
    let mut fs = T2fs::mount(&faulty).unwrap();
    fs.mkdir("/d").unwrap();
    let data_start = u64::from(fs.superblock().data_sector_start);
    faulty.from_sector.store(data_start, Ordering::SeqCst);
    faulty.fail_reads.store(true, Ordering::SeqCst);
    assert!(matches!(fs.chdir("/d"), Err(T2fsError::Device { .. })));
    assert!(matches!(fs.getcwd(), Ok(ref cwd) if cwd == "/"));
}

#[test]
fn exhausted_fat_reports_no_free_space() {
    // 40 sectors, 1 sector per cluster: 38 usable clusters.
    let dev = ByteSectorDevice::in_memory(40);
    let options = FormatOptions {
        sector_count: None,
        sectors_per_cluster: 1,
        fat_sectors: None,
    };
    format(&dev, &options).unwrap();
    let mut fs = T2fs::mount(&dev).unwrap();
    let free = fs.geometry().free_clusters;
    let fh = fs.create("/fill").unwrap();
    let cs = fs.geometry().cluster_size;

    let too_big = vec![1_u8; (free as usize + 1) * cs];
    assert!(matches!(fs.write(fh, &too_big), Err(T2fsError::NoFreeSpace)));
    // Clusters linked before the failure stay on the file's chain.
    let chain = fs.fat_chain("/fill").unwrap();
    assert_eq!(chain.len(), free as usize);
    assert_eq!(fs.geometry().free_clusters, 0);
    assert!(matches!(fs.mkdir("/d"), Err(T2fsError::NoFreeSpace)));
}
