use core::ops::Range;

/// 半开区间 `[start, end)` 上需要的两个派生运算
pub trait Interval: Sized {
    /// 交集，不相交时为空
    fn intersection(&self, other: &Self) -> Option<Self>;

    /// 长度 `end - start`
    fn span(&self) -> u64;
}

impl Interval for Range<u64> {
    #[inline]
    fn intersection(&self, other: &Self) -> Option<Self> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(start..end)
    }

    #[inline]
    fn span(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}
