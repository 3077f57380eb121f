//! # 文件系统层
//!
//! 挂载时重放日志，重建每个文件的映射与空闲空间；
//! 运行时负责文件登记、为文件扩展分配区段，以及发布引导内核。

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::mem;
use core::ops::Range;
use core::sync::atomic::{AtomicU64, Ordering};

use block_dev::{BlockDevice, IoBuf};
use spin::Mutex;
use vfs::Error;

use crate::file::{Extent, File, FileId, FileState};
use crate::free::FreeSpace;
use crate::journal::Journal;
use crate::layout::header::Header;
use crate::layout::record::Record;
use crate::layout::root::Tuple;
use crate::range::Interval;
use crate::range_map::RangeMap;
use crate::{INITIAL_LOG_SIZE, ROOT_SIZE, StatusHandler, checked_pad, pad};

pub type MountHandler = Box<dyn FnOnce(Result<Arc<Filesystem>, Error>) + Send>;

/// 卷的几何参数，格式化时写入日志头，挂载时必须一致
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// 分配粒度，2的幂
    pub alignment: u64,
    /// 卷大小（字节）
    pub size: u64,
}

impl Config {
    pub fn new(alignment: u64, size: u64) -> Self {
        Self { alignment, size }
    }

    pub fn validate(&self, device_size: u64) -> Result<(), Error> {
        let valid = self.alignment.is_power_of_two()
            && self.alignment <= INITIAL_LOG_SIZE
            && self.size > INITIAL_LOG_SIZE
            && self.size <= device_size;
        if !valid {
            log::error!("invalid configuration {self:?} for a device of {device_size:#x} bytes");
            return Err(Error::InvalidConfig);
        }
        Ok(())
    }
}

pub struct Filesystem {
    device: Arc<dyn BlockDevice>,
    config: Config,
    free: Mutex<FreeSpace>,
    files: Mutex<BTreeMap<FileId, Arc<File>>>,
    next_id: AtomicU64,
    journal: Journal,
}

/// 重放日志时积累的状态
#[derive(Default)]
struct Replay {
    alignment: u64,
    size: u64,
    free: FreeSpace,
    files: BTreeMap<FileId, FileState>,
    next_id: u64,
}

impl Replay {
    fn apply(&mut self, record: Record) -> Result<(), Error> {
        let file = record.file();
        let state = match record {
            Record::Create { .. } => {
                if self.files.insert(file, FileState::default()).is_some() {
                    log::error!("file {file} created twice");
                    return Err(Error::CorruptMetadata);
                }
                self.next_id = self.next_id.max(u64::from(file) + 1);
                return Ok(());
            }
            Record::Delete { .. } => {
                let mut state = self.files.remove(&file).ok_or(Error::CorruptMetadata)?;
                let runs = state.cut(0, self.alignment);
                return runs.into_iter().try_for_each(|run| self.free.release(run));
            }
            _ => self.files.get_mut(&file).ok_or(Error::CorruptMetadata)?,
        };

        match record {
            Record::Extent {
                offset,
                length,
                storage,
                ..
            } => {
                let end = offset.checked_add(length).ok_or(Error::CorruptMetadata)?;
                let run_end = checked_pad(length, self.alignment)
                    .filter(|&len| len <= self.size)
                    .and_then(|len| storage.checked_add(len))
                    .ok_or_else(|| {
                        log::error!("file {file} extent of {length:#x} bytes at {storage:#x} exceeds the volume");
                        Error::CorruptMetadata
                    })?;
                self.free.reserve(storage..run_end)?;
                state
                    .extents
                    .coalescing_insert(offset..end, storage)
                    .map_err(|e| {
                        log::error!("file {file} extent [{offset:#x}, {end:#x}): {e:?}");
                        Error::CorruptMetadata
                    })
            }
            Record::Length { length, .. } => {
                state.meta.length = length;
                Ok(())
            }
            Record::Truncate { length, .. } => {
                state.meta.length = length;
                let runs = state.cut(length, self.alignment);
                runs.into_iter().try_for_each(|run| self.free.release(run))
            }
            Record::Create { .. } | Record::Delete { .. } => Ok(()),
        }
    }
}

impl Filesystem {
    /// 挂载 `device` 上的文件系统，未格式化的卷会被格式化。
    ///
    /// 卷开头的 `[0, INITIAL_LOG_SIZE)` 为根元组与日志保留，不参与分配。
    pub fn create(device: Arc<dyn BlockDevice>, config: Config, done: MountHandler) {
        if let Err(e) = config.validate(device.size()) {
            return done(Err(e));
        }

        let mut free = FreeSpace::new(config.size);
        if let Err(e) = free.reserve(0..INITIAL_LOG_SIZE) {
            return done(Err(e));
        }
        let replay = Arc::new(Mutex::new(Replay {
            alignment: config.alignment,
            size: config.size,
            free,
            files: BTreeMap::new(),
            next_id: 1,
        }));

        let applier = replay.clone();
        let dev = device.clone();
        Journal::open(
            device,
            Header::new(config.alignment, config.size),
            move |record| applier.lock().apply(record),
            Box::new(move |journal| {
                let journal = match journal {
                    Ok(journal) => journal,
                    Err(e) => return done(Err(e)),
                };
                let replay = mem::take(&mut *replay.lock());
                let fs = Self::assemble(dev, config, journal, replay);
                log::info!(
                    "mounted: {} files, {} log records, {:#x} bytes free",
                    fs.files.lock().len(),
                    fs.journal.records(),
                    fs.free_bytes()
                );
                done(Ok(fs))
            }),
        );
    }

    fn assemble(
        device: Arc<dyn BlockDevice>,
        config: Config,
        journal: Journal,
        replay: Replay,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<Self>| {
            let files = replay
                .files
                .into_iter()
                .map(|(id, state)| (id, Arc::new(File::new(id, me.clone(), state))))
                .collect();
            Self {
                device,
                config,
                free: Mutex::new(replay.free),
                files: Mutex::new(files),
                next_id: AtomicU64::new(replay.next_id),
                journal,
            }
        })
    }

    #[inline]
    pub fn config(&self) -> Config {
        self.config
    }

    #[inline]
    pub fn alignment(&self) -> u64 {
        self.config.alignment
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.config.size
    }

    #[inline]
    pub(crate) fn device(&self) -> &dyn BlockDevice {
        &*self.device
    }

    #[inline]
    pub(crate) fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn free_bytes(&self) -> u64 {
        self.free.lock().free_bytes()
    }

    /// 当前的空闲区，按起点升序
    pub fn free_runs(&self) -> Vec<Range<u64>> {
        self.free.lock().runs().collect()
    }

    /// 日志还能容纳的记录数
    pub fn log_remaining(&self) -> usize {
        self.journal.remaining()
    }

    pub fn create_file(self: &Arc<Self>) -> Result<Arc<File>, Error> {
        let id = FileId::from(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.journal.append(Record::Create { file: id })?;

        let file = Arc::new(File::new(id, Arc::downgrade(self), FileState::default()));
        self.files.lock().insert(id, file.clone());
        log::debug!("created file {id}");
        Ok(file)
    }

    pub fn lookup(&self, id: FileId) -> Result<Arc<File>, Error> {
        self.files.lock().get(&id).cloned().ok_or(Error::NotFound)
    }

    pub fn files(&self) -> Vec<FileId> {
        self.files.lock().keys().copied().collect()
    }

    /// 删除文件，其区段在删除记录落盘后归还
    pub fn delete(self: &Arc<Self>, id: FileId, done: StatusHandler) {
        let file = match self.lookup(id) {
            Ok(file) => file,
            Err(e) => return done(Err(e)),
        };

        // 标记与删除记录在同一把文件锁下完成，此后旧句柄不会再追加这个文件的记录
        let runs = {
            let mut state = file.lock();
            if state.deleted {
                Err(Error::NotFound)
            } else {
                self.journal.append(Record::Delete { file: id }).map(|()| {
                    state.deleted = true;
                    state.meta.length = 0;
                    state.cut(0, self.alignment())
                })
            }
        };
        match runs {
            Ok(runs) => {
                self.files.lock().remove(&id);
                log::debug!("deleted file {id}");
                self.release_after_flush(runs, done);
            }
            Err(e) => done(Err(e)),
        }
    }

    /// 把日志中尚未落盘的记录写回
    pub fn flush(&self, done: StatusHandler) {
        self.journal.flush(done);
    }

    /// 为文件的空洞 `gap` 分配一个新区段并记入日志。
    ///
    /// 物理占用补齐到分配粒度；补齐出的部分不会再被其它区段使用。
    pub(crate) fn extend(
        &self,
        file: FileId,
        extents: &mut RangeMap<u64>,
        gap: Range<u64>,
    ) -> Result<Extent, Error> {
        let len = pad(gap.span(), self.alignment());
        let physical = self.free.lock().alloc(len).ok_or_else(|| {
            log::warn!("no free run of {len:#x} bytes for file {file}");
            Error::StorageExhausted
        })?;
        let run = physical..physical + len;

        if let Err(e) = extents.coalescing_insert(gap.clone(), physical) {
            log::error!("file {file} gap {gap:x?} is already mapped: {e:?}");
            self.release(run);
            return Err(Error::CorruptMetadata);
        }

        let record = Record::Extent {
            file,
            offset: gap.start,
            length: gap.span(),
            storage: physical,
        };
        if let Err(e) = self.journal.append(record) {
            extents.remove(gap);
            self.release(run);
            return Err(e);
        }

        log::debug!("file {file} extent {gap:x?} -> {physical:#x} ({len:#x} bytes)");
        Ok(Extent {
            logical: gap,
            physical,
        })
    }

    fn release(&self, run: Range<u64>) {
        if let Err(e) = self.free.lock().release(run.clone()) {
            log::error!("lost run {run:x?}: {e}");
        }
    }

    /// 日志落盘后归还 `runs`，写回失败时这些空间保持占用
    pub(crate) fn release_after_flush(self: &Arc<Self>, runs: Vec<Range<u64>>, done: StatusHandler) {
        if runs.is_empty() {
            return self.journal.flush(done);
        }

        let fs = self.clone();
        self.journal.flush(Box::new(move |status| {
            if status.is_ok() {
                for run in runs {
                    fs.release(run);
                }
            }
            done(status)
        }));
    }

    /// 把文件登记为引导内核：在根元组页写入它的物理位置。
    ///
    /// 引导程序只能读一段连续的数据，所以文件必须恰好是一个从0开始、覆盖全长的区段。
    pub fn publish_kernel(&self, file: &File, done: StatusHandler) {
        let length = file.len();
        let extents = file.extents();
        let physical = match extents.as_slice() {
            [only] if only.logical == (0..length) => only.physical,
            _ => {
                log::warn!("file {} has {} extents, cannot boot from it", file.id(), extents.len());
                return done(Err(Error::NotContiguous));
            }
        };

        let mut page = Tuple::kernel(physical, length).to_bytes();
        if page.len() > ROOT_SIZE as usize {
            return done(Err(Error::InvalidConfig));
        }
        page.resize(ROOT_SIZE as usize, 0);

        log::info!("kernel at [{physical:#x}, {:#x})", physical + length);
        self.device.write(
            0,
            IoBuf::from(page),
            Box::new(move |status| done(status.map_err(Error::from))),
        );
    }
}
