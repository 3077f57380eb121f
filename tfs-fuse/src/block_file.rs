use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use block_dev::{BlockDevice, Error, IoBuf, Status, StatusHandler};

/// 以宿主机上的镜像文件充当块设备，请求在提交时就地完成
#[derive(Debug)]
pub struct BlockFile {
    file: Mutex<File>,
    size: u64,
}

impl BlockFile {
    pub fn new(file: File) -> io::Result<Self> {
        let size = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            size,
        })
    }

    fn transfer(&self, offset: u64, buf: &IoBuf, write: bool) -> Status {
        let end = offset.checked_add(buf.len() as u64).ok_or(Error::OutOfBounds)?;
        if end > self.size {
            return Err(Error::OutOfBounds);
        }

        let mut file = self.file.lock().map_err(|_| Error::Io)?;
        let result = file.seek(SeekFrom::Start(offset)).and_then(|_| {
            let moved = if write {
                buf.map(|src| file.write_all(src))
            } else {
                buf.map_mut(|dest| file.read_exact(dest))
            };
            moved.unwrap_or_else(|e| Err(io::Error::other(format!("{e:?}"))))
        });

        result.map_err(|e| {
            log::error!("image {} at {offset:#x}: {e}", if write { "write" } else { "read" });
            Error::Io
        })
    }
}

impl BlockDevice for BlockFile {
    fn read(&self, offset: u64, dest: IoBuf, done: StatusHandler) {
        let status = if dest.is_valid() {
            self.transfer(offset, &dest, false)
        } else {
            Err(Error::Fault)
        };
        done(status);
    }

    fn write(&self, offset: u64, source: IoBuf, done: StatusHandler) {
        let status = if source.is_valid() {
            self.transfer(offset, &source, true)
        } else {
            Err(Error::Fault)
        };
        done(status);
    }

    fn size(&self) -> u64 {
        self.size
    }
}
