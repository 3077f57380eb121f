//! # 区段解析
//!
//! 把文件的一段逻辑区间解析为两部分：
//! - 被已有区段覆盖的部分，每段对应一次块请求；
//! - 未被覆盖的空洞，读时补零，写时交给扩展逻辑分配新区段。
//!
//! 解析在持有文件锁时进行，得到的计划复制出来后再释放锁、发起请求，
//! 因为设备可能就地完成并重入文件系统。

use alloc::vec::Vec;
use core::ops::Range;

use block_dev::{BlockDevice, IoBuf};

use crate::file::Extent;
use crate::merge::Merge;
use crate::range_map::RangeMap;

/// 一段逻辑区间的解析结果，两部分都按逻辑起点升序
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub mapped: Vec<Extent>,
    pub holes: Vec<Range<u64>>,
}

pub fn resolve(extents: &RangeMap<u64>, query: Range<u64>) -> Resolution {
    let mut resolution = Resolution::default();
    let mut last = query.start;

    extents.range_lookup(query.clone(), |logical, physical| {
        if last < logical.start {
            resolution.holes.push(last..logical.start);
        }
        last = logical.end;
        resolution.mapped.push(Extent { logical, physical });
    });
    if last < query.end {
        resolution.holes.push(last..query.end);
    }

    resolution
}

/// `logical` 在以 `base` 为起点的缓冲区中的位置
#[inline]
fn relative(logical: &Range<u64>, base: u64) -> Range<usize> {
    (logical.start - base) as usize..(logical.end - base) as usize
}

/// 空洞补零，每个区段发起一次读请求
pub fn dispatch_read(
    device: &dyn BlockDevice,
    resolution: &Resolution,
    base: u64,
    dest: &IoBuf,
    merge: &Merge,
) {
    for hole in &resolution.holes {
        if let Err(e) = dest.slice(relative(hole, base)).fill(0) {
            merge.fail(e.into());
        }
    }

    for extent in &resolution.mapped {
        let view = dest.slice(relative(&extent.logical, base));
        device.read(extent.physical, view, merge.device_handle());
    }
}

/// 写入一组区段，每个区段一次写请求
pub fn dispatch_write(
    device: &dyn BlockDevice,
    extents: &[Extent],
    base: u64,
    source: &IoBuf,
    merge: &Merge,
) {
    for extent in extents {
        let view = source.slice(relative(&extent.logical, base));
        device.write(extent.physical, view, merge.device_handle());
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;

    fn mapping() -> RangeMap<u64> {
        let mut extents = RangeMap::new();
        extents.insert(0..100, 65536).unwrap();
        extents.insert(200..300, 70000).unwrap();
        extents
    }

    #[test]
    fn holes_between_and_after() {
        let r = resolve(&mapping(), 50..400);
        assert_eq!(
            r.mapped,
            vec![
                Extent {
                    logical: 50..100,
                    physical: 65586
                },
                Extent {
                    logical: 200..300,
                    physical: 70000
                },
            ]
        );
        assert_eq!(r.holes, vec![100..200, 300..400]);
    }

    #[test]
    fn entirely_inside_one_extent() {
        let r = resolve(&mapping(), 210..220);
        assert!(r.holes.is_empty());
        assert_eq!(r.mapped[0].physical, 70010);
    }

    #[test]
    fn empty_mapping_is_one_hole() {
        let r = resolve(&RangeMap::new(), 100_000..100_010);
        assert!(r.mapped.is_empty());
        assert_eq!(r.holes, vec![100_000..100_010]);
    }
}
