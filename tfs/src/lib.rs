#![no_std]

extern crate alloc;

/* tfs 的整体架构，自上而下 */

// 文件系统层：挂载、文件登记、扩展与日志的编排
mod fs;

// 文件层：单个文件的读写、截断
mod file;

// 区段解析层：把逻辑区间解析为物理区段与空洞
mod resolve;

// 元数据日志：区段变更的预写日志
mod journal;

// 空闲空间分配器
mod free;

// 完成合并：多路异步请求汇聚为一个完成
mod merge;

// 区间索引
mod range;
pub mod range_map;

// 磁盘数据结构层
pub mod layout;

use alloc::boxed::Box;

pub use self::{
    file::{Extent, File, FileId, FileMeta},
    free::FreeSpace,
    fs::{Config, Filesystem, MountHandler},
    layout::root::{KernelExtent, lookup_kernel},
    merge::Merge,
    range::Interval,
    range_map::RangeMap,
};
pub use block_dev::{BlockDevice, IoBuf};
pub use vfs::{Error, Stat};

pub type Status = Result<(), Error>;

/// 异步操作结束时调用，恰好一次
pub type StatusHandler = Box<dyn FnOnce(Status) + Send>;

/// 读操作结束时调用，携带实际读取的字节数
pub type ReadHandler = Box<dyn FnOnce(Result<usize, Error>) + Send>;

/// 卷开头为引导程序保留的根元组区
pub const ROOT_SIZE: u64 = 4096;

/// 卷开头的保留区（根元组 + 元数据日志），不参与分配
pub const INITIAL_LOG_SIZE: u64 = 64 * 1024;

/// 日志写回的粒度
pub const SECTOR_SIZE: u64 = 512;

pub const MAGIC: u32 = 0x7466_7301;

/// 把 `len` 向上补齐到 `alignment` 的整数倍，`alignment` 必须是2的幂
#[inline]
pub const fn pad(len: u64, alignment: u64) -> u64 {
    (len + alignment - 1) & !(alignment - 1)
}

/// 同 [`pad`]，溢出时返回 `None`；用于来自磁盘、不可信的长度
#[inline]
pub const fn checked_pad(len: u64, alignment: u64) -> Option<u64> {
    match len.checked_add(alignment - 1) {
        Some(n) => Some(n & !(alignment - 1)),
        None => None,
    }
}
