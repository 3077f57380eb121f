//! # 根元组
//!
//! 卷的第一页存放一棵编码后的元组树，供第二阶段引导程序定位内核：
//! 沿 `children -> kernel -> contents` 下降，取出 `offset` 与 `length`。
//! 引导程序不能分配内存，所以查找直接在原始字节上进行。
//!
//! 编码：整棵树以 `u32` 字节长度开头；每个条目依次为
//! `u8` 键长、键、`u8` 标签（0 整数，1 元组），
//! 整数为 `u8` 长度加十进制 ASCII 数字，元组为 `u32` 字节长度加嵌套编码。
//! 多字节整数均为小端序。

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use super::read_u32;

pub const CHILDREN: &str = "children";
pub const KERNEL: &str = "kernel";
pub const CONTENTS: &str = "contents";
pub const OFFSET: &str = "offset";
pub const LENGTH: &str = "length";

const INT: u8 = 0;
const TUPLE: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(u64),
    Tuple(Tuple),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Tuple {
    entries: Vec<(String, Value)>,
}

impl Tuple {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.entries.push((key.to_string(), value));
        self
    }

    /// 内核所在的连续区段
    pub fn kernel(offset: u64, length: u64) -> Self {
        let contents = Tuple::new()
            .with(OFFSET, Value::Int(offset))
            .with(LENGTH, Value::Int(length));
        let kernel = Tuple::new().with(CONTENTS, Value::Tuple(contents));
        let children = Tuple::new().with(KERNEL, Value::Tuple(kernel));
        Tuple::new().with(CHILDREN, Value::Tuple(children))
    }

    /// 带长度前缀的完整编码
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }

    fn encode(&self, out: &mut Vec<u8>) {
        let at = out.len();
        out.extend_from_slice(&[0; 4]);

        for (key, value) in &self.entries {
            out.push(key.len() as u8);
            out.extend_from_slice(key.as_bytes());
            match value {
                Value::Int(n) => {
                    let digits = n.to_string();
                    out.push(INT);
                    out.push(digits.len() as u8);
                    out.extend_from_slice(digits.as_bytes());
                }
                Value::Tuple(tuple) => {
                    out.push(TUPLE);
                    tuple.encode(out);
                }
            }
        }

        let len = (out.len() - at - 4) as u32;
        out[at..at + 4].copy_from_slice(&len.to_le_bytes());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelExtent {
    pub offset: u64,
    pub length: u64,
}

/// 在根页上查找内核的位置，编码不完整或缺少任一层时返回 `None`
pub fn lookup_kernel(page: &[u8]) -> Option<KernelExtent> {
    let root = tuple_body(page, 0)?;
    let children = find_tuple(root, CHILDREN)?;
    let kernel = find_tuple(children, KERNEL)?;
    let contents = find_tuple(kernel, CONTENTS)?;

    Some(KernelExtent {
        offset: find_int(contents, OFFSET)?,
        length: find_int(contents, LENGTH)?,
    })
}

enum Raw<'a> {
    Int(&'a [u8]),
    Tuple(&'a [u8]),
}

fn tuple_body(bytes: &[u8], at: usize) -> Option<&[u8]> {
    let len = read_u32(bytes, at)? as usize;
    bytes.get(at + 4..at + 4 + len)
}

fn find<'a>(body: &'a [u8], key: &str) -> Option<Raw<'a>> {
    let mut at = 0;
    while at < body.len() {
        let key_len = *body.get(at)? as usize;
        let this = body.get(at + 1..at + 1 + key_len)?;
        at += 1 + key_len;

        let (raw, next) = match *body.get(at)? {
            INT => {
                let len = *body.get(at + 1)? as usize;
                let digits = body.get(at + 2..at + 2 + len)?;
                (Raw::Int(digits), at + 2 + len)
            }
            TUPLE => {
                let nested = tuple_body(body, at + 1)?;
                (Raw::Tuple(nested), at + 5 + nested.len())
            }
            _ => return None,
        };
        if this == key.as_bytes() {
            return Some(raw);
        }
        at = next;
    }
    None
}

fn find_tuple<'a>(body: &'a [u8], key: &str) -> Option<&'a [u8]> {
    match find(body, key)? {
        Raw::Tuple(nested) => Some(nested),
        Raw::Int(_) => None,
    }
}

fn find_int(body: &[u8], key: &str) -> Option<u64> {
    let Raw::Int(digits) = find(body, key)? else {
        return None;
    };
    if digits.is_empty() {
        return None;
    }
    digits.iter().try_fold(0u64, |n, &d| {
        d.is_ascii_digit()
            .then_some(())
            .and_then(|_| n.checked_mul(10)?.checked_add(u64::from(d - b'0')))
    })
}
