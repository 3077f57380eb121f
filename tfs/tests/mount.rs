mod common;

use std::sync::Arc;

use block_dev::BlockDevice;
use block_dev::ramdisk::RamDisk;
use tfs::layout::header::{HEADER_SIZE, Header};
use tfs::{
    Config, Error, Filesystem, INITIAL_LOG_SIZE, IoBuf, KernelExtent, ROOT_SIZE, lookup_kernel,
};

use self::common::*;

fn remount(disk: &RamDisk) -> (Arc<RamDisk>, Result<Arc<Filesystem>, Error>) {
    let disk = Arc::new(RamDisk::from_image(disk.snapshot()));
    let fs = mount(&disk);
    (disk, fs)
}

#[test]
fn fresh_volume() {
    let disk = disk();
    let fs = mount(&disk).unwrap();
    assert!(fs.files().is_empty());
    assert_eq!(fs.free_runs(), [INITIAL_LOG_SIZE..SIZE]);

    let header = Header::decode(&disk.peek(ROOT_SIZE as usize..ROOT_SIZE as usize + HEADER_SIZE).unwrap());
    assert_eq!(header, Some(Header::new(ALIGNMENT, SIZE)));
}

#[test]
fn remount_rebuilds_extents_and_free_space() {
    let disk = disk();
    let fs = mount(&disk).unwrap();
    let a = fs.create_file().unwrap();
    let b = fs.create_file().unwrap();
    write(&disk, &a, 0, &[1; 3000]).unwrap();
    write(&disk, &b, 100_000, b"0123456789").unwrap();
    write(&disk, &a, 5000, &[2; 10]).unwrap();

    let (disk, again) = remount(&disk);
    let again = again.unwrap();
    assert_eq!(again.files(), [a.id(), b.id()]);
    assert_eq!(again.free_runs(), fs.free_runs());

    let a2 = again.lookup(a.id()).unwrap();
    assert_eq!(a2.extents(), a.extents());
    assert_eq!(a2.len(), 5010);
    assert_eq!(read(&disk, &a2, 0, 3000).unwrap(), vec![1; 3000]);
    assert_eq!(read(&disk, &a2, 3000, 2000).unwrap(), vec![0; 2000]);

    let b2 = again.lookup(b.id()).unwrap();
    assert_eq!(read(&disk, &b2, 100_000, 10).unwrap(), b"0123456789");
    assert_space_accounted(&again);

    // 新文件不与已有的编号冲突
    let c = again.create_file().unwrap();
    assert!(c.id() > b.id());
}

#[test]
fn truncate_and_delete_survive_remount() {
    let disk = disk();
    let fs = mount(&disk).unwrap();
    let a = fs.create_file().unwrap();
    let b = fs.create_file().unwrap();
    write(&disk, &a, 0, &[1; 4096]).unwrap();
    write(&disk, &b, 0, &[2; 4096]).unwrap();

    let slot = Slot::new();
    a.truncate(1000, slot.handler());
    disk.run();
    slot.take().unwrap().unwrap();

    let slot = Slot::new();
    fs.delete(b.id(), slot.handler());
    disk.run();
    slot.take().unwrap().unwrap();

    let (_disk, again) = remount(&disk);
    let again = again.unwrap();
    assert_eq!(again.files(), [a.id()]);
    assert_eq!(again.lookup(a.id()).unwrap().len(), 1000);
    assert_eq!(again.free_runs(), fs.free_runs());
    assert_eq!(again.free_bytes(), SIZE - INITIAL_LOG_SIZE - 1024);
}

#[test]
fn unflushed_metadata_is_lost() {
    let disk = disk();
    let fs = mount(&disk).unwrap();
    let a = fs.create_file().unwrap();
    let _ = fs.create_file().unwrap();

    let (_disk, again) = remount(&disk);
    assert!(again.unwrap().files().is_empty());

    write(&disk, &a, 0, b"x").unwrap();
    let (_disk, again) = remount(&disk);
    assert_eq!(again.unwrap().files().len(), 2);

    flush(&disk, &fs).unwrap();
}

#[test]
fn corrupt_record_fails_mount() {
    let disk = disk();
    let fs = mount(&disk).unwrap();
    let a = fs.create_file().unwrap();
    write(&disk, &a, 0, b"data").unwrap();

    // 第一条记录的标签
    let first = ROOT_SIZE + HEADER_SIZE as u64;
    disk.write(first, IoBuf::from(&[0x7F][..]), Box::new(|_| {}));
    disk.run();

    let (_disk, again) = remount(&disk);
    assert_eq!(again.err(), Some(Error::CorruptMetadata));
}

#[test]
fn overflowing_extent_record_fails_mount() {
    // 第二条记录（区段）的长度字段
    let length_field = ROOT_SIZE + HEADER_SIZE as u64 + 40 + 24;

    for patched in [u64::MAX, SIZE, SIZE * 2] {
        let disk = disk();
        let fs = mount(&disk).unwrap();
        let a = fs.create_file().unwrap();
        write(&disk, &a, 0, b"data").unwrap();

        disk.write(
            length_field,
            IoBuf::from(&patched.to_le_bytes()[..]),
            Box::new(|_| {}),
        );
        disk.run();

        let (_disk, again) = remount(&disk);
        assert_eq!(again.err(), Some(Error::CorruptMetadata), "length {patched:#x}");
    }
}

#[test]
fn bad_magic_fails_mount_without_formatting() {
    let disk = disk();
    let fs = mount(&disk).unwrap();
    let a = fs.create_file().unwrap();
    write(&disk, &a, 0, b"data").unwrap();
    let log = disk.peek(ROOT_SIZE as usize..INITIAL_LOG_SIZE as usize).unwrap();

    disk.write(ROOT_SIZE, IoBuf::from(&[0xAB; 4][..]), Box::new(|_| {}));
    disk.run();

    let (disk, again) = remount(&disk);
    assert_eq!(again.err(), Some(Error::CorruptMetadata));
    // 记录原样保留
    let after = disk.peek(ROOT_SIZE as usize..INITIAL_LOG_SIZE as usize).unwrap();
    assert_eq!(after[..4], [0xAB; 4]);
    assert_eq!(after[4..], log[4..]);
}

#[test]
fn stale_handle_after_delete() {
    let disk = disk();
    let fs = mount(&disk).unwrap();
    let file = fs.create_file().unwrap();
    write(&disk, &file, 0, b"abc").unwrap();

    let slot = Slot::new();
    fs.delete(file.id(), slot.handler());
    disk.run();
    slot.take().unwrap().unwrap();
    let free = fs.free_bytes();
    let remaining = fs.log_remaining();

    assert_eq!(write(&disk, &file, 0, b"zzz"), Err(Error::NotFound));
    assert_eq!(read(&disk, &file, 0, 3), Err(Error::NotFound));
    let slot = Slot::new();
    file.truncate(10, slot.handler());
    assert_eq!(slot.take(), Some(Err(Error::NotFound)));
    let slot = Slot::new();
    fs.delete(file.id(), slot.handler());
    assert_eq!(slot.take(), Some(Err(Error::NotFound)));

    // 没有分配空间，也没有追加记录
    assert_eq!(fs.free_bytes(), free);
    assert_eq!(fs.log_remaining(), remaining);

    flush(&disk, &fs).unwrap();
    let (_disk, again) = remount(&disk);
    let again = again.unwrap();
    assert!(again.files().is_empty());
    assert_eq!(again.free_runs(), [INITIAL_LOG_SIZE..SIZE]);
}

#[test]
fn delete_while_write_in_flight() {
    let disk = disk();
    let fs = mount(&disk).unwrap();
    let file = fs.create_file().unwrap();

    let written = Slot::new();
    file.write(IoBuf::from(&b"abc"[..]), 0, written.handler());
    let deleted = Slot::new();
    fs.delete(file.id(), deleted.handler());
    disk.run();

    assert_eq!(deleted.take(), Some(Ok(())));
    assert_eq!(written.take(), Some(Err(Error::NotFound)));
    assert_eq!(fs.free_runs(), [INITIAL_LOG_SIZE..SIZE]);

    let (_disk, again) = remount(&disk);
    let again = again.unwrap();
    assert!(again.files().is_empty());
    assert_eq!(again.free_runs(), [INITIAL_LOG_SIZE..SIZE]);
}

#[test]
fn geometry_mismatch_fails_mount() {
    let disk = disk();
    mount(&disk).unwrap();

    let slot = Slot::new();
    Filesystem::create(disk.clone(), Config::new(4096, SIZE), slot.handler());
    disk.run();
    assert_eq!(slot.take().unwrap().err(), Some(Error::CorruptMetadata));
}

#[test]
fn invalid_config() {
    let disk = disk();
    for config in [
        Config::new(3, SIZE),
        Config::new(ALIGNMENT, INITIAL_LOG_SIZE),
        Config::new(ALIGNMENT, SIZE * 2),
    ] {
        let slot = Slot::new();
        Filesystem::create(disk.clone(), config, slot.handler());
        assert_eq!(slot.take().unwrap().err(), Some(Error::InvalidConfig));
    }
    assert_eq!(disk.pending(), 0);
}

#[test]
fn publish_kernel() {
    let disk = disk();
    let fs = mount(&disk).unwrap();
    let kernel = fs.create_file().unwrap();
    write(&disk, &kernel, 0, &[0x90; 10_000]).unwrap();
    let extent = kernel.extents()[0].clone();

    let slot = Slot::new();
    fs.publish_kernel(&kernel, slot.handler());
    disk.run();
    slot.take().unwrap().unwrap();

    let page = disk.peek(0..ROOT_SIZE as usize).unwrap();
    assert_eq!(
        lookup_kernel(&page),
        Some(KernelExtent {
            offset: extent.physical,
            length: 10_000
        })
    );
    assert_eq!(
        disk.peek(extent.physical as usize..extent.physical as usize + 10_000).unwrap(),
        vec![0x90; 10_000]
    );

    // 根元组页不属于日志区，重新挂载后保持不变
    let (disk, again) = remount(&disk);
    again.unwrap();
    assert_eq!(disk.peek(0..ROOT_SIZE as usize).unwrap(), page);
}

#[test]
fn fragmented_kernel_is_rejected() {
    let disk = disk();
    let fs = mount(&disk).unwrap();
    let kernel = fs.create_file().unwrap();
    write(&disk, &kernel, 0, &[1; 10]).unwrap();
    write(&disk, &kernel, 10, &[2; 10]).unwrap();

    let slot = Slot::new();
    fs.publish_kernel(&kernel, slot.handler());
    assert_eq!(slot.take(), Some(Err(Error::NotContiguous)));

    let empty = fs.create_file().unwrap();
    let slot = Slot::new();
    fs.publish_kernel(&empty, slot.handler());
    assert_eq!(slot.take(), Some(Err(Error::NotContiguous)));
}
