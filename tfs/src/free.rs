//! # 空闲空间分配器
//!
//! 包装空闲区间索引，按首次适配分出连续的物理区段。
//! 归还的区段与相邻空闲区合并，所以任何完全空闲的区间一定落在单个条目内。

use core::ops::Range;

use vfs::Error;

use crate::range::Interval;
use crate::range_map::RangeMap;

#[derive(Debug, Default, Clone)]
pub struct FreeSpace {
    free: RangeMap<()>,
    size: u64,
}

impl FreeSpace {
    /// 整个 `[0, size)` 初始均为空闲
    pub fn new(size: u64) -> Self {
        let mut free = RangeMap::new();
        if size > 0 {
            // 非空区间插入空索引不会失败
            let _ = free.insert(0..size, ());
        }
        Self { free, size }
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// 分出长度为 `len` 的连续区段，返回其物理起点
    pub fn alloc(&mut self, len: u64) -> Option<u64> {
        let run = self.free.first_fit(len)?;
        self.free.remove(run.clone());
        Some(run.start)
    }

    /// 占用指定区段，区段必须完全空闲
    pub fn reserve(&mut self, range: Range<u64>) -> Result<(), Error> {
        if range.span() == 0 || self.free.covered(&range) != range.span() {
            log::error!("reserving {range:x?} which is not entirely free");
            return Err(Error::CorruptMetadata);
        }
        self.free.remove(range);
        Ok(())
    }

    /// 归还区段，区段必须完全不空闲
    pub fn release(&mut self, range: Range<u64>) -> Result<(), Error> {
        if range.end > self.size {
            log::error!("releasing {range:x?} beyond the volume");
            return Err(Error::CorruptMetadata);
        }
        self.free.coalescing_insert(range.clone(), ()).map_err(|e| {
            log::error!("releasing {range:x?}: {e:?}");
            Error::CorruptMetadata
        })
    }

    #[inline]
    pub fn is_free(&self, range: &Range<u64>) -> bool {
        self.free.covered(range) == range.span()
    }

    #[inline]
    pub fn free_bytes(&self) -> u64 {
        self.free.total_span()
    }

    /// 按起点升序遍历空闲区
    pub fn runs(&self) -> impl Iterator<Item = Range<u64>> + '_ {
        self.free.iter().map(|(range, _)| range)
    }
}
