//! # 内存盘
//!
//! 以内存模拟的块设备。请求默认进入队列，由调用方扮演协作式调度器，
//! 通过 [`RamDisk::poll`] 等方法逐个完成，从而可以按任意顺序完成请求；
//! 以 [`RamDisk::immediate`] 创建时则在提交时就地完成。
//!
//! 数据在请求**完成**时才真正搬运，与真实设备的 DMA 时机一致。

use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;
use core::ops::Range;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::{BlockDevice, Error, IoBuf, Status, StatusHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Read,
    Write,
}

struct Request {
    op: Op,
    offset: u64,
    buf: IoBuf,
    done: StatusHandler,
}

/// 注入的故障：与 `range` 相交的 `op` 请求失败
#[derive(Debug, Clone)]
struct Fault {
    op: Op,
    range: Range<u64>,
}

pub struct RamDisk {
    data: Mutex<Vec<u8>>,
    queue: Mutex<VecDeque<Request>>,
    faults: Mutex<Vec<Fault>>,
    immediate: bool,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl core::fmt::Debug for RamDisk {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RamDisk")
            .field("size", &self.size())
            .field("pending", &self.pending())
            .field("immediate", &self.immediate)
            .finish()
    }
}

impl RamDisk {
    /// 请求排队，等待调度
    pub fn new(size: usize) -> Self {
        Self::with_mode(vec![0; size], false)
    }

    /// 提交即完成
    pub fn immediate(size: usize) -> Self {
        Self::with_mode(vec![0; size], true)
    }

    /// 以已有镜像创建，用于模拟重启
    pub fn from_image(image: Vec<u8>) -> Self {
        Self::with_mode(image, false)
    }

    fn with_mode(data: Vec<u8>, immediate: bool) -> Self {
        Self {
            data: Mutex::new(data),
            queue: Mutex::new(VecDeque::new()),
            faults: Mutex::new(Vec::new()),
            immediate,
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// 尚未完成的请求数
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// 完成最早提交的请求，队列为空时返回 `false`
    pub fn poll(&self) -> bool {
        let request = self.queue.lock().pop_front();
        request.map(|request| self.complete(request)).is_some()
    }

    /// 完成最晚提交的请求
    pub fn poll_newest(&self) -> bool {
        let request = self.queue.lock().pop_back();
        request.map(|request| self.complete(request)).is_some()
    }

    /// 按提交顺序完成全部请求（包括完成回调中新提交的），返回完成数
    pub fn run(&self) -> usize {
        let mut count = 0;
        while self.poll() {
            count += 1;
        }
        count
    }

    /// 总是先完成最新的请求
    pub fn run_reversed(&self) -> usize {
        let mut count = 0;
        while self.poll_newest() {
            count += 1;
        }
        count
    }

    /// 之后与 `range` 相交的写请求失败
    pub fn fail_writes(&self, range: Range<u64>) {
        self.faults.lock().push(Fault {
            op: Op::Write,
            range,
        });
    }

    /// 之后与 `range` 相交的读请求失败
    pub fn fail_reads(&self, range: Range<u64>) {
        self.faults.lock().push(Fault { op: Op::Read, range });
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// 已完成的读请求数
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// 已完成的写请求数
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// 绕过请求队列直接查看设备内容，越界时返回 `None`
    pub fn peek(&self, range: Range<usize>) -> Option<Vec<u8>> {
        self.data.lock().get(range).map(<[u8]>::to_vec)
    }

    /// 整盘镜像
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    fn submit(&self, request: Request) {
        if self.immediate {
            self.complete(request);
        } else {
            self.queue.lock().push_back(request);
        }
    }

    fn complete(&self, request: Request) {
        let Request {
            op,
            offset,
            buf,
            done,
        } = request;
        let status = self.execute(op, offset, &buf);
        if let Err(e) = status {
            log::debug!("ramdisk {op:?} at {offset:#x} len={} failed: {e:?}", buf.len());
        }
        // 回调可能继续提交请求，此时不能持有任何锁
        done(status);
    }

    fn execute(&self, op: Op, offset: u64, buf: &IoBuf) -> Status {
        let start = usize::try_from(offset).map_err(|_| Error::OutOfBounds)?;
        let end = start.checked_add(buf.len()).ok_or(Error::OutOfBounds)?;
        let range = offset..end as u64;

        if self
            .faults
            .lock()
            .iter()
            .any(|fault| fault.op == op && fault.range.start < range.end && range.start < fault.range.end)
        {
            return Err(Error::Io);
        }

        let mut data = self.data.lock();
        let block = data.get_mut(start..end).ok_or(Error::OutOfBounds)?;
        match op {
            Op::Read => {
                buf.map_mut(|dest| dest.copy_from_slice(block))?;
                self.reads.fetch_add(1, Ordering::Relaxed);
            }
            Op::Write => {
                buf.map(|src| block.copy_from_slice(src))?;
                self.writes.fetch_add(1, Ordering::Relaxed);
            }
        }

        Ok(())
    }
}

impl BlockDevice for RamDisk {
    fn read(&self, offset: u64, dest: IoBuf, done: StatusHandler) {
        self.submit(Request {
            op: Op::Read,
            offset,
            buf: dest,
            done,
        });
    }

    fn write(&self, offset: u64, source: IoBuf, done: StatusHandler) {
        self.submit(Request {
            op: Op::Write,
            offset,
            buf: source,
            done,
        });
    }

    fn size(&self) -> u64 {
        self.data.lock().len() as u64
    }
}
