//! # 磁盘布局
//!
//! ```text
//! 0          ROOT_SIZE    +512                        INITIAL_LOG_SIZE
//! | 根元组   | 日志头     | 日志记录（每条40字节）...  | 数据区（按对齐粒度分配）...
//! ```

pub mod header;
pub mod record;
pub mod root;

#[inline]
fn read_u64(bytes: &[u8], at: usize) -> Option<u64> {
    let raw = bytes.get(at..at + 8)?;
    raw.try_into().ok().map(u64::from_le_bytes)
}

#[inline]
fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let raw = bytes.get(at..at + 4)?;
    raw.try_into().ok().map(u32::from_le_bytes)
}
