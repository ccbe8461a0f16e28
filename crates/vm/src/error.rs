//! 分页子系统错误类型
//!
//! [`VmError`] 描述单个操作失败的原因，可通过 [`VmError::to_errno()`] 转换为系统调用错误码；
//! [`FaultError`] 描述缺页处理终止进程的原因。

/// 分页操作中可能发生的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// 驱逐后仍无可用物理帧 (-ENOMEM)
    OutOfFrames,
    /// 交换区已满 (-ENOMEM)
    SwapFull,
    /// 元数据分配失败 (-ENOMEM)
    OutOfMemory,
    /// 文件或交换设备读写失败，包括短读短写 (-EIO)
    Io,
    /// 地址非法或不可访问 (-EFAULT)
    InvalidAddress,
    /// 参数不满足对齐或长度要求 (-EINVAL)
    InvalidArgument,
    /// 目标页已有映射 (-EEXIST)
    AlreadyMapped,
    /// 目标页或映射不存在 (-ENOENT)
    NotMapped,
}

impl VmError {
    /// 转换为系统调用错误码（负数）
    pub fn to_errno(&self) -> isize {
        match self {
            VmError::NotMapped => -2,
            VmError::Io => -5,
            VmError::OutOfFrames | VmError::SwapFull | VmError::OutOfMemory => -12,
            VmError::InvalidAddress => -14,
            VmError::AlreadyMapped => -17,
            VmError::InvalidArgument => -22,
        }
    }
}

/// 分页操作的结果类型
pub type VmResult<T> = Result<T, VmError>;

/// 缺页导致进程被终止的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// 空指针、内核空间或低于最低用户地址
    BadAddress,
    /// 既没有页表项，也不是合理的栈增长
    InvalidReference,
    /// 写只读页
    WriteToReadOnly,
    /// 访问栈底保护页
    StackOverflow,
    /// 处理某页缺页期间同一页再次缺页
    NestedFault,
    /// 资源耗尽或 I/O 失败
    Resource(VmError),
}

impl FaultError {
    /// 被终止进程的退出状态
    pub fn exit_status(&self) -> i32 {
        -1
    }
}

impl From<VmError> for FaultError {
    fn from(err: VmError) -> Self {
        FaultError::Resource(err)
    }
}
