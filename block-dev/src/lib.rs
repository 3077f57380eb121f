//! # 块设备接口层
//!
//! 块设备是以**块**为单位存储数据的设备，例如磁盘、光盘、U盘等；
//! [`BlockDevice`] 就是对读写块设备的抽象，
//! 实现了此特质的类型称为**块设备驱动**。
//!
//! 内核中没有“一个请求一个线程”的模型，所以读写都是异步的：
//! 调用方提交请求后立即返回，请求结束时驱动调用随请求传入的
//! [`StatusHandler`]。驱动可以在提交时就地完成（轮询），
//! 也可以在之后的中断或调度点完成。

#![no_std]

extern crate alloc;

mod buffer;
pub mod ramdisk;

use alloc::boxed::Box;
use core::any::Any;

pub use self::buffer::IoBuf;

/// 块设备层的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// 设备报告读写失败
    Io,
    /// 调用方提供的缓冲区视图无效
    Fault,
    /// 访问超出设备容量
    OutOfBounds,
}

pub type Status = Result<(), Error>;

/// 请求结束时调用，恰好一次
pub type StatusHandler = Box<dyn FnOnce(Status) + Send>;

/// 块设备驱动特质
///
/// 偏移量以字节计。
pub trait BlockDevice: Send + Sync + Any {
    /// 从 `offset` 处读出 `dest.len()` 字节填充 `dest`
    fn read(&self, offset: u64, dest: IoBuf, done: StatusHandler);

    /// 把 `source` 写到 `offset` 处
    fn write(&self, offset: u64, source: IoBuf, done: StatusHandler);

    /// 设备容量（字节）
    fn size(&self) -> u64;

    fn handle_irq(&self) {}
}
