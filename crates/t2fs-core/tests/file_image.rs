#![forbid(unsafe_code)]

use t2fs_block::{ByteSectorDevice, FileByteDevice};
use t2fs_core::{FormatOptions, T2fs, format};
use t2fs_types::SECTOR_SIZE;

#[test]
fn file_backed_image_persists_across_mounts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image = dir.path().join("disk.t2fs");

    {
        let file = FileByteDevice::create(&image, 512 * SECTOR_SIZE as u64).unwrap();
        let dev = ByteSectorDevice::new(file).unwrap();
        format(&dev, &FormatOptions::default()).unwrap();
        let mut fs = T2fs::mount(dev).unwrap();
        fs.mkdir("/docs").unwrap();
        let fh = fs.create("/docs/readme").unwrap();
        fs.write(fh, b"stored on a real file").unwrap();
        fs.close(fh).unwrap();
        fs.link("/latest", "/docs/readme").unwrap();
        fs.sync().unwrap();
    }

    let dev = ByteSectorDevice::new(FileByteDevice::open(&image).unwrap()).unwrap();
    let mut fs = T2fs::mount(dev).unwrap();
    let fh = fs.open("/latest").unwrap();
    let mut buf = [0_u8; 64];
    let n = fs.read(fh, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"stored on a real file");
    assert_eq!(fs.read_link("/latest").unwrap(), "/docs/readme");
}
