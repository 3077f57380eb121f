//! # 区间索引
//!
//! 以区间起点为键的有序结构，存储互不重叠的 `区间 -> 值`。
//! 每个文件系统有两类实例：一个记录空闲的物理空间，
//! 每个文件一个记录其逻辑区间到物理偏移的映射。
//!
//! 区间可以被切分（删除中间一段、截掉尾部），
//! 切出的后半段的值由 [`Splittable::advance`] 推算。

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::ops::Range;

use crate::range::Interval;

/// 可随区间切分的值
pub trait Splittable: Clone {
    /// 区间起点后移 `by` 字节后对应的值
    fn advance(&self, by: u64) -> Self;
}

/// 空闲空间索引不携带值
impl Splittable for () {
    #[inline]
    fn advance(&self, _: u64) -> Self {}
}

/// 物理偏移随逻辑起点一同后移
impl Splittable for u64 {
    #[inline]
    fn advance(&self, by: u64) -> Self {
        self + by
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertError {
    /// 区间长度为0
    Empty,
    /// 与已有区间重叠
    Overlap,
}

#[derive(Debug, Clone)]
struct Entry<V> {
    end: u64,
    value: V,
}

#[derive(Debug, Clone)]
pub struct RangeMap<V> {
    map: BTreeMap<u64, Entry<V>>,
}

impl<V> Default for RangeMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> RangeMap<V> {
    pub const fn new() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    /// 区间个数
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// 按起点升序遍历
    pub fn iter(&self) -> impl Iterator<Item = (Range<u64>, &V)> {
        self.map
            .iter()
            .map(|(&start, entry)| (start..entry.end, &entry.value))
    }

    /// 全部区间的总长度
    pub fn total_span(&self) -> u64 {
        self.map.iter().map(|(&start, entry)| entry.end - start).sum()
    }

    /// 最后一个区间的终点
    pub fn last_end(&self) -> Option<u64> {
        self.map.last_key_value().map(|(_, entry)| entry.end)
    }

    /// 首个长度不小于 `len` 的区间，返回其开头的 `len` 字节
    pub fn first_fit(&self, len: u64) -> Option<Range<u64>> {
        if len == 0 {
            return None;
        }
        self.map
            .iter()
            .find(|&(&start, entry)| entry.end - start >= len)
            .map(|(&start, _)| start..start + len)
    }

    /// `query` 中已被占用的字节数
    pub fn covered(&self, query: &Range<u64>) -> u64 {
        self.overlapping(query)
            .filter_map(|(&start, entry)| (start..entry.end).intersection(query))
            .map(|i| i.span())
            .sum()
    }

    #[inline]
    pub fn overlaps(&self, query: &Range<u64>) -> bool {
        self.overlapping(query).next().is_some()
    }

    /// 与 `query` 相交的全部条目，按起点升序
    fn overlapping(&self, query: &Range<u64>) -> impl Iterator<Item = (&u64, &Entry<V>)> {
        let start = query.start;
        let end = query.end.max(start);
        // 起点在 query 之前、但跨入 query 的那个条目
        let head = self
            .map
            .range(..start)
            .next_back()
            .filter(move |(_, entry)| start < end && entry.end > start);
        head.into_iter().chain(self.map.range(start..end))
    }
}

impl<V: Splittable> RangeMap<V> {
    pub fn insert(&mut self, range: Range<u64>, value: V) -> Result<(), InsertError> {
        if range.start >= range.end {
            return Err(InsertError::Empty);
        }
        if self.overlaps(&range) {
            return Err(InsertError::Overlap);
        }

        self.map.insert(
            range.start,
            Entry {
                end: range.end,
                value,
            },
        );
        Ok(())
    }

    /// 包含 `offset` 的区间及其值（已推进到区间起点）
    pub fn get(&self, offset: u64) -> Option<(Range<u64>, V)> {
        self.map
            .range(..=offset)
            .next_back()
            .filter(|(_, entry)| entry.end > offset)
            .map(|(&start, entry)| (start..entry.end, entry.value.clone()))
    }

    /// 对每个与 `query` 相交的区间按起点升序调用一次 `f(交集, 值)`，
    /// 值已推进到交集的起点。
    pub fn range_lookup(&self, query: Range<u64>, mut f: impl FnMut(Range<u64>, V)) {
        for (&start, entry) in self.overlapping(&query) {
            if let Some(i) = (start..entry.end).intersection(&query) {
                let value = entry.value.advance(i.start - start);
                f(i, value);
            }
        }
    }

    /// 删去 `range` 内的全部字节，必要时切分区间。返回删去的字节数。
    pub fn remove(&mut self, range: Range<u64>) -> u64 {
        let hits: Vec<(u64, u64)> = self
            .overlapping(&range)
            .map(|(&start, entry)| (start, entry.end))
            .collect();

        let mut removed = 0;
        for (start, end) in hits {
            let Some(entry) = self.map.remove(&start) else {
                continue;
            };
            let cut_start = start.max(range.start);
            let cut_end = end.min(range.end);
            removed += cut_end - cut_start;

            if start < cut_start {
                self.map.insert(
                    start,
                    Entry {
                        end: cut_start,
                        value: entry.value.clone(),
                    },
                );
            }
            if cut_end < end {
                self.map.insert(
                    cut_end,
                    Entry {
                        end,
                        value: entry.value.advance(cut_end - start),
                    },
                );
            }
        }

        removed
    }
}

impl<V: Splittable + PartialEq> RangeMap<V> {
    /// 插入并与首尾相接、值也相接的邻居合并
    pub fn coalescing_insert(&mut self, range: Range<u64>, value: V) -> Result<(), InsertError> {
        self.insert(range.clone(), value.clone())?;

        let mut start = range.start;
        let mut value = value;
        let prev = self
            .map
            .range(..range.start)
            .next_back()
            .map(|(&prev_start, prev)| (prev_start, prev.end, prev.value.clone()));
        if let Some((prev_start, prev_end, prev_value)) = prev {
            if prev_end == range.start && prev_value.advance(range.start - prev_start) == value {
                value = prev_value;
                start = prev_start;
                self.map.remove(&range.start);
                if let Some(prev) = self.map.get_mut(&prev_start) {
                    prev.end = range.end;
                }
            }
        }

        let joins_next = self
            .map
            .get(&range.end)
            .is_some_and(|next| next.value == value.advance(range.end - start));
        if joins_next {
            if let Some(next) = self.map.remove(&range.end) {
                if let Some(merged) = self.map.get_mut(&start) {
                    merged.end = next.end;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;
    use alloc::vec::Vec;

    use super::*;

    fn collect<V: Clone>(map: &RangeMap<V>) -> Vec<(Range<u64>, V)> {
        map.iter().map(|(r, v)| (r, v.clone())).collect()
    }

    #[test]
    fn rejects_empty_and_overlapping() {
        let mut map = RangeMap::new();
        assert_eq!(map.insert(5..5, 0u64), Err(InsertError::Empty));
        map.insert(10..20, 100).unwrap();
        assert_eq!(map.insert(15..25, 0), Err(InsertError::Overlap));
        assert_eq!(map.insert(0..11, 0), Err(InsertError::Overlap));
        assert_eq!(map.insert(12..13, 0), Err(InsertError::Overlap));
        map.insert(20..30, 200).unwrap();
        map.insert(0..10, 300).unwrap();
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn lookup_clips_in_ascending_order() {
        let mut map = RangeMap::new();
        map.insert(40..50, 4000u64).unwrap();
        map.insert(0..10, 1000).unwrap();
        map.insert(20..30, 2000).unwrap();

        let mut seen = Vec::new();
        map.range_lookup(5..45, |i, physical| seen.push((i, physical)));
        assert_eq!(seen, vec![(5..10, 1005), (20..30, 2000), (40..45, 4000)]);

        seen.clear();
        map.range_lookup(10..20, |i, physical| seen.push((i, physical)));
        assert!(seen.is_empty());

        seen.clear();
        map.range_lookup(25..25, |i, physical| seen.push((i, physical)));
        assert!(seen.is_empty());
    }

    #[test]
    fn remove_splits() {
        let mut map = RangeMap::new();
        map.insert(0..100, 1000u64).unwrap();
        assert_eq!(map.remove(40..60), 20);
        assert_eq!(collect(&map), vec![(0..40, 1000), (60..100, 1060)]);

        // 跨越两个区间和中间的空隙
        assert_eq!(map.remove(30..70), 20);
        assert_eq!(collect(&map), vec![(0..30, 1000), (70..100, 1070)]);

        assert_eq!(map.remove(200..300), 0);
        assert_eq!(map.remove(0..100), 60);
        assert!(map.is_empty());
    }

    #[test]
    fn coalesce_free_runs() {
        let mut free: RangeMap<()> = RangeMap::new();
        free.coalescing_insert(0..10, ()).unwrap();
        free.coalescing_insert(20..30, ()).unwrap();
        free.coalescing_insert(10..20, ()).unwrap();
        assert_eq!(collect(&free), vec![(0..30, ())]);

        free.coalescing_insert(40..50, ()).unwrap();
        assert_eq!(free.len(), 2);
        assert_eq!(free.first_fit(15), Some(0..15));
        assert_eq!(free.first_fit(31), None);
        assert_eq!(free.covered(&(25..45)), 10);
    }

    #[test]
    fn coalesce_respects_values() {
        let mut map = RangeMap::new();
        map.coalescing_insert(0..10, 100u64).unwrap();
        // 逻辑相接但物理不相接
        map.coalescing_insert(10..20, 500).unwrap();
        // 逻辑、物理都相接
        map.coalescing_insert(20..30, 510).unwrap();
        assert_eq!(collect(&map), vec![(0..10, 100), (10..30, 500)]);
        assert_eq!(map.get(25), Some((10..30, 500)));
        assert_eq!(map.get(30), None);
    }
}
