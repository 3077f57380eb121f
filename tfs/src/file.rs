//! # 文件层
//!
//! 每个文件持有一份逻辑区间到物理偏移的映射和长度元数据，
//! 通过弱引用借用所属文件系统的分配、日志与块设备。
//!
//! 读写都不阻塞：解析映射、必要时扩展文件，然后为每个区段发出一次块请求，
//! 全部请求经 [`Merge`] 汇聚后调用一次完成回调。

use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::ops::Range;

use block_dev::IoBuf;
use derive_more::{Display, From, Into};
use spin::Mutex;
use vfs::{Error, Stat};

use crate::fs::Filesystem;
use crate::layout::record::Record;
use crate::merge::Merge;
use crate::range::Interval;
use crate::range_map::RangeMap;
use crate::resolve::{self, resolve};
use crate::{ReadHandler, StatusHandler, pad};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into, Display)]
pub struct FileId(u64);

/// 文件的元数据记录
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    /// 文件长度，只在写入完全成功后增长
    pub length: u64,
}

/// 区段：逻辑区间连同它映射到的物理偏移，两者等长
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extent {
    pub logical: Range<u64>,
    pub physical: u64,
}

impl Extent {
    #[inline]
    pub fn len(&self) -> u64 {
        self.logical.span()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 受文件锁保护的部分
#[derive(Debug, Default)]
pub(crate) struct FileState {
    pub extents: RangeMap<u64>,
    pub meta: FileMeta,
    /// 删除记录已追加，之后的读写截断都以 [`Error::NotFound`] 结束
    pub deleted: bool,
}

impl FileState {
    /// 丢弃 `from` 之后的全部映射，返回应归还的物理区段。
    ///
    /// 区段的物理占用是补齐后的长度，保留部分同样按补齐后的长度计算，
    /// 所以归还的是 `[p + pad(kept), p + pad(span))`。
    pub fn cut(&mut self, from: u64, alignment: u64) -> Vec<Range<u64>> {
        let runs = self
            .extents
            .iter()
            .filter(|(logical, _)| logical.end > from)
            .filter_map(|(logical, &physical)| {
                let kept = from.saturating_sub(logical.start);
                let run = physical + pad(kept, alignment)..physical + pad(logical.span(), alignment);
                (run.span() > 0).then_some(run)
            })
            .collect();
        self.extents.remove(from..u64::MAX);
        runs
    }

    /// 按分配粒度计的占用
    pub fn blocks(&self, alignment: u64) -> u64 {
        self.extents
            .iter()
            .map(|(logical, _)| pad(logical.span(), alignment) / alignment)
            .sum()
    }
}

pub struct File {
    id: FileId,
    fs: Weak<Filesystem>,
    inner: Mutex<FileState>,
}

impl core::fmt::Debug for File {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("File").field("id", &self.id).finish_non_exhaustive()
    }
}

impl File {
    pub(crate) fn new(id: FileId, fs: Weak<Filesystem>, state: FileState) -> Self {
        Self {
            id,
            fs,
            inner: Mutex::new(state),
        }
    }

    #[inline]
    pub fn id(&self) -> FileId {
        self.id
    }

    /// 文件长度
    pub fn len(&self) -> u64 {
        self.inner.lock().meta.length
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn meta(&self) -> FileMeta {
        self.inner.lock().meta
    }

    /// 按逻辑起点升序的全部区段
    pub fn extents(&self) -> Vec<Extent> {
        self.inner
            .lock()
            .extents
            .iter()
            .map(|(logical, &physical)| Extent { logical, physical })
            .collect()
    }

    pub fn stat(&self) -> Result<Stat, Error> {
        let alignment = self.fs()?.alignment();
        let inner = self.inner.lock();
        Ok(Stat {
            block_size: alignment,
            blocks: inner.blocks(alignment),
            size: inner.meta.length,
            extents: inner.extents.len() as u64,
        })
    }

    fn fs(&self) -> Result<Arc<Filesystem>, Error> {
        self.fs.upgrade().ok_or(Error::NotFound)
    }

    pub(crate) fn lock(&self) -> spin::MutexGuard<'_, FileState> {
        self.inner.lock()
    }

    /// 从 `offset` 处读至多 `dest.len()` 字节，完成时给出实际读取的字节数。
    ///
    /// 请求在文件末尾处截断；起点越过文件末尾时以 [`Error::OutOfRange`] 结束。
    /// 空洞读作0，不发出块请求。
    pub fn read(&self, dest: IoBuf, offset: u64, done: ReadHandler) {
        let fs = match self.fs() {
            Ok(fs) => fs,
            Err(e) => return done(Err(e)),
        };

        let plan = {
            let inner = self.inner.lock();
            let length = inner.meta.length;
            if inner.deleted {
                Err(Error::NotFound)
            } else if offset > length || (offset == length && !dest.is_empty()) {
                log::debug!("file {} read at {offset:#x} beyond end of file", self.id);
                Err(Error::OutOfRange)
            } else {
                let n = (dest.len() as u64).min(length - offset);
                Ok((n, resolve(&inner.extents, offset..offset + n)))
            }
        };
        let (n, resolution) = match plan {
            Ok(plan) => plan,
            Err(e) => return done(Err(e)),
        };

        let merge = Merge::new(Box::new(move |status| done(status.map(|()| n as usize))));
        resolve::dispatch_read(fs.device(), &resolution, offset, &dest, &merge);
        merge.release();
    }

    /// 读出整个文件，缓冲区按分配粒度补齐
    pub fn read_entire(&self, done: Box<dyn FnOnce(Result<IoBuf, Error>) + Send>) {
        let alignment = match self.fs() {
            Ok(fs) => fs.alignment(),
            Err(e) => return done(Err(e)),
        };
        let length = self.len();
        let buf = IoBuf::zeroed(pad(length, alignment) as usize);
        let view = buf.slice(0..length as usize);
        self.read(
            view,
            0,
            Box::new(move |result| done(result.map(|n| buf.slice(0..n)))),
        );
    }

    /// 把 `source` 写到 `offset` 处。
    ///
    /// 已映射的部分原地覆盖，未映射的部分（尾部和中间的空洞）各自分配新区段。
    /// 新区段的日志记录落盘后才算完成；全部成功时文件长度增长到 `offset + source.len()`。
    pub fn write(self: &Arc<Self>, source: IoBuf, offset: u64, done: StatusHandler) {
        let fs = match self.fs() {
            Ok(fs) => fs,
            Err(e) => return done(Err(e)),
        };
        if source.is_empty() {
            return done(Ok(()));
        }
        let Some(end) = offset.checked_add(source.len() as u64) else {
            return done(Err(Error::OutOfRange));
        };

        let file = self.clone();
        let fs_ = fs.clone();
        let merge = Merge::new(Box::new(move |status| match status {
            Ok(()) => file.commit_length(&fs_, end, done),
            Err(e) => {
                log::warn!("file {} write [{offset:#x}, {end:#x}) failed: {e}", file.id);
                done(Err(e))
            }
        }));

        let plan = {
            let mut inner = self.inner.lock();
            if inner.deleted {
                None
            } else {
                Some(self.plan_write(&fs, &mut inner, offset..end, &merge))
            }
        };
        let Some((extents, extended)) = plan else {
            merge.fail(Error::NotFound);
            return merge.release();
        };

        resolve::dispatch_write(fs.device(), &extents, offset, &source, &merge);
        if extended {
            fs.journal().flush(merge.handle());
        }
        merge.release();
    }

    /// 解析写入区间，为其中的空洞分配新区段；分配失败记入 `merge`
    fn plan_write(
        &self,
        fs: &Filesystem,
        inner: &mut FileState,
        range: Range<u64>,
        merge: &Merge,
    ) -> (Vec<Extent>, bool) {
        let resolution = resolve(&inner.extents, range);
        let mut extents = resolution.mapped;
        let mut extended = false;
        for gap in resolution.holes {
            match fs.extend(self.id, &mut inner.extents, gap) {
                Ok(extent) => {
                    extents.push(extent);
                    extended = true;
                }
                Err(e) => merge.fail(e),
            }
        }
        (extents, extended)
    }

    fn commit_length(&self, fs: &Filesystem, end: u64, done: StatusHandler) {
        let status = {
            let mut inner = self.inner.lock();
            if inner.deleted {
                Some(Err(Error::NotFound))
            } else if end <= inner.meta.length {
                None
            } else {
                let record = Record::Length {
                    file: self.id,
                    length: end,
                };
                Some(fs.journal().append(record).map(|()| inner.meta.length = end))
            }
        };

        match status {
            None => done(Ok(())),
            Some(Ok(())) => fs.journal().flush(done),
            Some(Err(e)) => done(Err(e)),
        }
    }

    /// 把文件长度设为 `length`，丢弃其后的区段。
    ///
    /// 释放的物理空间在截断记录落盘后才归还给分配器。
    pub fn truncate(&self, length: u64, done: StatusHandler) {
        let fs = match self.fs() {
            Ok(fs) => fs,
            Err(e) => return done(Err(e)),
        };

        let runs = {
            let mut inner = self.inner.lock();
            let record = Record::Truncate {
                file: self.id,
                length,
            };
            if inner.deleted {
                Err(Error::NotFound)
            } else {
                fs.journal().append(record).map(|()| {
                    inner.meta.length = length;
                    inner.cut(length, fs.alignment())
                })
            }
        };

        match runs {
            Ok(runs) => fs.release_after_flush(runs, done),
            Err(e) => done(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;

    #[test]
    fn cut_returns_padded_tails() {
        let mut state = FileState::default();
        state.extents.insert(0..1000, 65536).unwrap();
        state.extents.insert(1000..1010, 70000).unwrap();
        state.extents.insert(4096..5000, 80000).unwrap();
        assert_eq!(state.blocks(512), 2 + 1 + 2);

        // 保留700字节，仍占1024字节
        let runs = state.cut(700, 512);
        assert_eq!(runs, vec![70000..70512, 80000..81024]);
        assert_eq!(state.extents.len(), 1);
        assert_eq!(state.blocks(512), 2);

        assert_eq!(state.cut(0, 512), vec![65536..66560]);
        assert!(state.extents.is_empty());
    }
}
