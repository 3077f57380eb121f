//! # I/O 缓冲区
//!
//! 异步请求的完成晚于提交，借用的切片活不到那时，
//! 所以请求双方共享同一块堆上缓冲区，各自持有一个视图。
//!
//! 视图在创建时不做检查，**访问时**才校验是否落在底层缓冲区之内；
//! 越界的视图在访问时得到 [`Error::Fault`]。

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::ops::Range;

use spin::Mutex;

use crate::Error;

#[derive(Debug, Clone)]
pub struct IoBuf {
    data: Arc<Mutex<Box<[u8]>>>,
    /// 视图在底层缓冲区中的位置
    range: Range<usize>,
}

impl IoBuf {
    pub fn zeroed(len: usize) -> Self {
        Self::from(vec![0; len])
    }

    /// 视图长度
    #[inline]
    pub fn len(&self) -> usize {
        self.range.end.saturating_sub(self.range.start)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 取子视图，`range` 相对于当前视图。
    pub fn slice(&self, range: Range<usize>) -> Self {
        Self {
            data: self.data.clone(),
            range: self.range.start.saturating_add(range.start)
                ..self.range.start.saturating_add(range.end),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.range.start <= self.range.end && self.range.end <= self.data.lock().len()
    }

    pub fn map<V>(&self, f: impl FnOnce(&[u8]) -> V) -> Result<V, Error> {
        let data = self.data.lock();
        let view = data.get(self.range.clone()).ok_or(Error::Fault)?;
        Ok(f(view))
    }

    pub fn map_mut<V>(&self, f: impl FnOnce(&mut [u8]) -> V) -> Result<V, Error> {
        let mut data = self.data.lock();
        let view = data.get_mut(self.range.clone()).ok_or(Error::Fault)?;
        Ok(f(view))
    }

    #[inline]
    pub fn fill(&self, byte: u8) -> Result<(), Error> {
        self.map_mut(|view| view.fill(byte))
    }

    #[inline]
    pub fn to_vec(&self) -> Result<Vec<u8>, Error> {
        self.map(<[u8]>::to_vec)
    }
}

impl From<Vec<u8>> for IoBuf {
    fn from(data: Vec<u8>) -> Self {
        let len = data.len();
        Self {
            data: Arc::new(Mutex::new(data.into_boxed_slice())),
            range: 0..len,
        }
    }
}

impl From<&[u8]> for IoBuf {
    fn from(data: &[u8]) -> Self {
        Self::from(data.to_vec())
    }
}
