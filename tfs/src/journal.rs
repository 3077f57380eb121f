//! # 元数据日志
//!
//! 区段映射的变更先追加到内存中的日志镜像，再由 [`Journal::flush`] 写回卷上的日志区。
//! 挂载时顺序重放全部记录即可重建每个文件的映射与空闲空间。
//!
//! 写回以扇区为单位，并且同一时刻至多一个写回在途：
//! 在途期间的写回请求排队，在途写回结束后合并为一次，
//! 这样较旧的扇区镜像不会覆盖较新的。

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::mem;

use block_dev::{BlockDevice, IoBuf};
use spin::Mutex;
use vfs::Error;

use crate::layout::header::{HEADER_SIZE, Header};
use crate::layout::record::{RECORD_SIZE, Record};
use crate::merge::Merge;
use crate::{INITIAL_LOG_SIZE, ROOT_SIZE, SECTOR_SIZE, StatusHandler, pad};

/// 日志区：紧跟根元组，到保留区末尾
const REGION_SIZE: usize = (INITIAL_LOG_SIZE - ROOT_SIZE) as usize;

pub type OpenHandler = Box<dyn FnOnce(Result<Journal, Error>) + Send>;

#[derive(Clone)]
pub struct Journal {
    device: Arc<dyn BlockDevice>,
    state: Arc<Mutex<State>>,
}

struct State {
    /// 日志区的内存镜像
    image: Vec<u8>,
    /// 下一条记录的位置
    tail: usize,
    /// `[0, durable)` 已落盘
    durable: usize,
    flushing: bool,
    /// 等待下一次写回的请求
    queued: Vec<StatusHandler>,
}

impl Journal {
    fn new(device: Arc<dyn BlockDevice>, image: Vec<u8>, tail: usize) -> Self {
        Self {
            device,
            state: Arc::new(Mutex::new(State {
                image,
                tail,
                durable: tail,
                flushing: false,
                queued: Vec::new(),
            })),
        }
    }

    /// 读出日志区：已格式化则逐条交给 `replay`，日志头扇区全零时就地格式化。
    ///
    /// 魔数不符、日志头的几何参数与 `geometry` 不符、记录无法解码或 `replay` 失败时，
    /// 以 [`Error::CorruptMetadata`] 结束。
    pub fn open<F>(device: Arc<dyn BlockDevice>, geometry: Header, mut replay: F, done: OpenHandler)
    where
        F: FnMut(Record) -> Result<(), Error> + Send + 'static,
    {
        let buf = IoBuf::zeroed(REGION_SIZE);
        let dev = device.clone();
        device.read(
            ROOT_SIZE,
            buf.clone(),
            Box::new(move |status| {
                let image = match status.and_then(|()| buf.to_vec()) {
                    Ok(image) => image,
                    Err(e) => {
                        log::error!("reading the metadata log: {e:?}");
                        return done(Err(e.into()));
                    }
                };

                let sector = &image[..HEADER_SIZE];
                let Some(header) = Header::decode(sector) else {
                    if sector.iter().all(|&b| b == 0) {
                        log::info!("no metadata log found, formatting");
                        return Self::format(dev, geometry, done);
                    }
                    log::error!("log header has a bad magic, refusing to format over it");
                    return done(Err(Error::CorruptMetadata));
                };
                if !header.is_valid()
                    || header.alignment != geometry.alignment
                    || header.size != geometry.size
                {
                    log::error!("log header {header:?} does not match {geometry:?}");
                    return done(Err(Error::CorruptMetadata));
                }

                let records = match Self::scan(&image) {
                    Ok(records) => records,
                    Err(e) => return done(Err(e)),
                };
                log::info!("replaying {} log records", records.len());
                let tail = HEADER_SIZE + records.len() * RECORD_SIZE;
                let journal = Self::new(dev, image, tail);

                for record in records {
                    if let Err(e) = replay(record) {
                        log::error!("replaying {record:?}: {e}");
                        return done(Err(e));
                    }
                }
                done(Ok(journal))
            }),
        );
    }

    /// 解码日志区中的全部记录，直到结束标记或日志区末尾
    fn scan(image: &[u8]) -> Result<Vec<Record>, Error> {
        let mut records = Vec::new();
        for slot in image[HEADER_SIZE..].chunks_exact(RECORD_SIZE) {
            match Record::decode(slot)? {
                Some(record) => records.push(record),
                None => break,
            }
        }
        Ok(records)
    }

    /// 清空根元组页，写入日志头与空的记录区
    fn format(device: Arc<dyn BlockDevice>, geometry: Header, done: OpenHandler) {
        let mut image = vec![0; REGION_SIZE];
        geometry.encode(&mut image[..HEADER_SIZE]);
        let region = IoBuf::from(image.clone());

        let journal = Self::new(device.clone(), image, HEADER_SIZE);
        let merge = Merge::new(Box::new(move |status| done(status.map(|()| journal))));
        device.write(0, IoBuf::zeroed(ROOT_SIZE as usize), merge.device_handle());
        device.write(ROOT_SIZE, region, merge.device_handle());
        merge.release();
    }

    /// 追加一条记录到内存镜像，不写回
    pub fn append(&self, record: Record) -> Result<(), Error> {
        let mut state = self.state.lock();
        let at = state.tail;
        let Some(slot) = state.image.get_mut(at..at + RECORD_SIZE) else {
            log::warn!("metadata log is full, dropping {record:?}");
            return Err(Error::LogFull);
        };
        record.encode(slot);
        state.tail += RECORD_SIZE;
        log::trace!("log append {record:?}");
        Ok(())
    }

    /// 写回全部未落盘的扇区
    pub fn flush(&self, done: StatusHandler) {
        let mut state = self.state.lock();
        if state.flushing {
            state.queued.push(done);
            return;
        }
        if state.durable >= state.tail {
            drop(state);
            return done(Ok(()));
        }

        let sector = SECTOR_SIZE as usize;
        let start = state.durable / sector * sector;
        let end = (pad(state.tail as u64, SECTOR_SIZE) as usize).min(state.image.len());
        let target = state.tail;
        let dirty = IoBuf::from(&state.image[start..end]);
        state.flushing = true;
        drop(state);

        log::debug!("log flush [{start:#x}, {end:#x})");
        let journal = self.clone();
        self.device.write(
            ROOT_SIZE + start as u64,
            dirty,
            Box::new(move |status| journal.flushed(target, status.map_err(Error::from), done)),
        );
    }

    fn flushed(&self, target: usize, status: crate::Status, done: StatusHandler) {
        let queued = {
            let mut state = self.state.lock();
            if status.is_ok() {
                state.durable = state.durable.max(target);
            }
            state.flushing = false;
            mem::take(&mut state.queued)
        };

        done(status);
        if !queued.is_empty() {
            self.flush(Box::new(move |status| {
                for done in queued {
                    done(status);
                }
            }));
        }
    }

    /// 已追加的记录数
    pub fn records(&self) -> usize {
        (self.state.lock().tail - HEADER_SIZE) / RECORD_SIZE
    }

    /// 日志区还能容纳的记录数
    pub fn remaining(&self) -> usize {
        let state = self.state.lock();
        (state.image.len() - state.tail) / RECORD_SIZE
    }
}
