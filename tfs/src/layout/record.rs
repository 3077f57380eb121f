//! 日志记录，定长40字节：
//!
//! ```text
//! | tag: u8 | 保留: [u8; 7] | file: u64 | a: u64 | b: u64 | c: u64 |
//! ```
//!
//! 标签为0的记录标志日志结束。

use vfs::Error;

use super::read_u64;
use crate::FileId;

pub const RECORD_SIZE: usize = 40;

const END: u8 = 0;
const CREATE: u8 = 1;
const EXTENT: u8 = 2;
const LENGTH: u8 = 3;
const TRUNCATE: u8 = 4;
const DELETE: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record {
    Create {
        file: FileId,
    },
    /// 逻辑区间 `[offset, offset+length)` 映射到物理偏移 `storage`
    Extent {
        file: FileId,
        offset: u64,
        length: u64,
        storage: u64,
    },
    Length {
        file: FileId,
        length: u64,
    },
    /// 丢弃 `length` 之后的全部区段
    Truncate {
        file: FileId,
        length: u64,
    },
    Delete {
        file: FileId,
    },
}

impl Record {
    pub fn file(&self) -> FileId {
        match *self {
            Self::Create { file }
            | Self::Extent { file, .. }
            | Self::Length { file, .. }
            | Self::Truncate { file, .. }
            | Self::Delete { file } => file,
        }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        let (tag, file, fields) = match *self {
            Self::Create { file } => (CREATE, file, [0; 3]),
            Self::Extent {
                file,
                offset,
                length,
                storage,
            } => (EXTENT, file, [offset, length, storage]),
            Self::Length { file, length } => (LENGTH, file, [length, 0, 0]),
            Self::Truncate { file, length } => (TRUNCATE, file, [length, 0, 0]),
            Self::Delete { file } => (DELETE, file, [0; 3]),
        };

        buf[..8].fill(0);
        buf[0] = tag;
        buf[8..16].copy_from_slice(&u64::from(file).to_le_bytes());
        for (i, field) in fields.into_iter().enumerate() {
            let at = 16 + i * 8;
            buf[at..at + 8].copy_from_slice(&field.to_le_bytes());
        }
    }

    /// 日志结束时返回 `Ok(None)`
    pub fn decode(buf: &[u8]) -> Result<Option<Self>, Error> {
        let field = |at| read_u64(buf, at).ok_or(Error::CorruptMetadata);

        if buf.len() < RECORD_SIZE {
            return Err(Error::CorruptMetadata);
        }
        let tag = buf[0];
        if tag == END {
            return Ok(None);
        }
        if buf[1..8].iter().any(|&b| b != 0) {
            return Err(Error::CorruptMetadata);
        }

        let file = FileId::from(field(8)?);
        let [a, b, c] = [field(16)?, field(24)?, field(32)?];
        let record = match tag {
            CREATE if a == 0 && b == 0 && c == 0 => Self::Create { file },
            EXTENT if b != 0 => Self::Extent {
                file,
                offset: a,
                length: b,
                storage: c,
            },
            LENGTH if b == 0 && c == 0 => Self::Length { file, length: a },
            TRUNCATE if b == 0 && c == 0 => Self::Truncate { file, length: a },
            DELETE if a == 0 && b == 0 && c == 0 => Self::Delete { file },
            _ => return Err(Error::CorruptMetadata),
        };

        Ok(Some(record))
    }
}
