#![allow(dead_code)]

use std::ops::Range;
use std::sync::{Arc, Mutex};

use block_dev::ramdisk::RamDisk;
use tfs::{Config, Error, File, Filesystem, INITIAL_LOG_SIZE, IoBuf, Status, pad};

pub const SIZE: u64 = 1 << 20;
pub const ALIGNMENT: u64 = 512;

/// 接住一次异步完成
pub struct Slot<T>(Arc<Mutex<Option<T>>>);

impl<T: Send + 'static> Slot<T> {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }

    pub fn handler(&self) -> Box<dyn FnOnce(T) + Send> {
        let slot = self.0.clone();
        Box::new(move |value| {
            let prev = slot.lock().unwrap().replace(value);
            assert!(prev.is_none(), "completion fired twice");
        })
    }

    pub fn take(&self) -> Option<T> {
        self.0.lock().unwrap().take()
    }
}

pub fn disk() -> Arc<RamDisk> {
    Arc::new(RamDisk::new(SIZE as usize))
}

pub fn mount(disk: &Arc<RamDisk>) -> Result<Arc<Filesystem>, Error> {
    let slot = Slot::new();
    Filesystem::create(disk.clone(), Config::new(ALIGNMENT, SIZE), slot.handler());
    disk.run();
    slot.take().expect("mount did not complete")
}

pub fn write(disk: &RamDisk, file: &Arc<File>, offset: u64, data: &[u8]) -> Status {
    let slot = Slot::new();
    file.write(IoBuf::from(data), offset, slot.handler());
    disk.run();
    slot.take().expect("write did not complete")
}

pub fn read(disk: &RamDisk, file: &File, offset: u64, len: usize) -> Result<Vec<u8>, Error> {
    let buf = IoBuf::zeroed(len);
    let slot = Slot::new();
    file.read(buf.clone(), offset, slot.handler());
    disk.run();
    let n = slot.take().expect("read did not complete")?;
    Ok(buf.to_vec().unwrap()[..n].to_vec())
}

pub fn flush(disk: &RamDisk, fs: &Filesystem) -> Status {
    let slot = Slot::new();
    fs.flush(slot.handler());
    disk.run();
    slot.take().expect("flush did not complete")
}

/// 保留区、各文件区段的物理占用与空闲区恰好铺满整个卷
pub fn assert_space_accounted(fs: &Filesystem) {
    let mut runs: Vec<Range<u64>> = vec![0..INITIAL_LOG_SIZE];
    for id in fs.files() {
        let file = fs.lookup(id).unwrap();
        for extent in file.extents() {
            let len = pad(extent.len(), fs.alignment());
            runs.push(extent.physical..extent.physical + len);
        }
    }
    runs.extend(fs.free_runs());
    runs.sort_by_key(|run| run.start);

    let mut cursor = 0;
    for run in runs {
        assert_eq!(run.start, cursor, "gap or overlap at {cursor:#x}");
        cursor = run.end;
    }
    assert_eq!(cursor, fs.size());
}
