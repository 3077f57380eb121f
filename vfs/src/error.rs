use derive_more::Display;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// 找不到足够大的连续空闲区
    #[display(fmt = "out of storage")]
    StorageExhausted,
    /// 元数据日志无法解码，或与卷的几何参数不符
    #[display(fmt = "corrupt metadata")]
    CorruptMetadata,
    /// 块设备报告的错误，原样传递
    #[display(fmt = "block I/O failed: {:?}", _0)]
    BlockIo(block_dev::Error),
    /// 读取起点越过文件末尾
    #[display(fmt = "offset out of range")]
    OutOfRange,
    #[display(fmt = "no such file")]
    NotFound,
    /// 日志区已写满
    #[display(fmt = "metadata log is full")]
    LogFull,
    /// 文件数据不是一段从0开始的连续区段
    #[display(fmt = "file is not contiguous")]
    NotContiguous,
    #[display(fmt = "invalid configuration")]
    InvalidConfig,
}

impl From<block_dev::Error> for Error {
    fn from(e: block_dev::Error) -> Self {
        Self::BlockIo(e)
    }
}
