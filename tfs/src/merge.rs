//! # 完成合并
//!
//! 一次逻辑请求会拆成若干个块请求，它们以任意顺序完成。
//! [`Merge`] 为每个块请求发放一个完成句柄，全部句柄都被调用后，
//! 最终完成恰好触发一次，携带第一个失败（如果有）。
//!
//! 计数器初始为1，代表发放者自己持有的一份。发放者在发放完所有句柄后
//! 通过 [`Merge::release`]（或直接丢弃）释放这一份，
//! 因此即便块请求就地完成，最终完成也不会在发放结束之前触发。

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;
use vfs::Error;

use crate::{Status, StatusHandler};

pub struct Merge {
    inner: Arc<Inner>,
}

struct Inner {
    pending: AtomicUsize,
    /// 第一个失败
    status: Mutex<Status>,
    done: Mutex<Option<StatusHandler>>,
}

impl Merge {
    pub fn new(done: StatusHandler) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: AtomicUsize::new(1),
                status: Mutex::new(Ok(())),
                done: Mutex::new(Some(done)),
            }),
        }
    }

    /// 发放一个完成句柄
    pub fn handle(&self) -> StatusHandler {
        let prev = self.inner.pending.fetch_add(1, Ordering::AcqRel);
        assert_ne!(prev, 0, "handle taken from a retired merge");

        let inner = self.inner.clone();
        Box::new(move |status| inner.complete(status))
    }

    /// 块设备层的完成句柄
    pub fn device_handle(&self) -> block_dev::StatusHandler {
        let handle = self.handle();
        Box::new(move |status: block_dev::Status| handle(status.map_err(Error::from)))
    }

    /// 以失败结束一个子操作
    pub fn fail(&self, e: Error) {
        self.handle()(Err(e));
    }

    /// 释放发放者持有的一份
    #[inline]
    pub fn release(self) {}
}

impl Drop for Merge {
    fn drop(&mut self) {
        self.inner.complete(Ok(()));
    }
}

impl Inner {
    fn complete(&self, status: Status) {
        if let Err(e) = status {
            let mut first = self.status.lock();
            if first.is_ok() {
                *first = Err(e);
            }
        }

        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            let status = *self.status.lock();
            let done = self.done.lock().take();
            if let Some(done) = done {
                done(status);
            }
        }
    }
}
