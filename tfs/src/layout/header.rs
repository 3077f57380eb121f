use super::{read_u32, read_u64};
use crate::MAGIC;

/// 日志头占据一个扇区
pub const HEADER_SIZE: usize = 512;

pub const VERSION: u32 = 1;

/// 日志头：
/// - 提供文件系统合法性校验；
/// - 记录格式化时的几何参数，挂载时必须一致
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// 魔数：用于校验文件系统合法性
    magic: u32,
    version: u32,
    /// 分配粒度
    pub alignment: u64,
    /// 卷大小（字节）
    pub size: u64,
}

impl Header {
    pub fn new(alignment: u64, size: u64) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            alignment,
            size,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC && self.version == VERSION
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..16].copy_from_slice(&self.alignment.to_le_bytes());
        buf[16..24].copy_from_slice(&self.size.to_le_bytes());
    }

    /// 魔数不符时返回 `None`，由调用方区分空白扇区与损坏的日志头
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let header = Self {
            magic: read_u32(buf, 0)?,
            version: read_u32(buf, 4)?,
            alignment: read_u64(buf, 8)?,
            size: read_u64(buf, 16)?,
        };
        (header.magic == MAGIC).then_some(header)
    }
}
