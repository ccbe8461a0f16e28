//! 进程管理接口

use crate::address::Vaddr;

/// 进程 ID
pub type Pid = usize;

/// 线程 ID，用于区分同一地址空间中并发的缺页
pub type Tid = usize;

/// 进程管理回调
///
/// 进程生命周期由内核管理，本 crate 只需要识别当前进程、
/// 读取其进入内核时保存的用户栈指针，并在致命缺页时终止它。
pub trait ProcessOps: Send + Sync {
    /// 当前运行的进程
    fn current_pid(&self) -> Pid;

    /// 当前运行的线程
    fn current_tid(&self) -> Tid;

    /// 以给定退出状态终止进程
    fn terminate(&self, pid: Pid, status: i32);

    /// 进程从用户态陷入内核时保存的用户栈指针
    ///
    /// 内核态访问用户地址引发缺页时，用它判断是否为栈增长。
    fn saved_user_sp(&self, pid: Pid) -> Option<Vaddr>;
}
