//! 进程表的 Mock 实现
//!
//! 记录当前进程、每个进程保存的用户栈指针以及被终止的进程。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::vec::Vec;

static NEXT_TID: AtomicUsize = AtomicUsize::new(1);

std::thread_local! {
    static TID: usize = NEXT_TID.fetch_add(1, Ordering::Relaxed);
}

/// 模拟的进程表
#[derive(Default)]
pub struct MockProcessTable {
    current: AtomicUsize,
    saved_sp: Mutex<BTreeMap<usize, usize>>,
    terminated: Mutex<Vec<(usize, i32)>>,
}

impl MockProcessTable {
    /// 创建空进程表
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前进程 ID
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// 切换当前进程
    pub fn set_current(&self, pid: usize) {
        self.current.store(pid, Ordering::SeqCst);
    }

    /// 当前线程 ID：每个宿主线程一个
    pub fn current_tid(&self) -> usize {
        TID.with(|tid| *tid)
    }

    /// 记录进程进入内核时保存的用户栈指针
    pub fn set_saved_sp(&self, pid: usize, sp: usize) {
        self.saved_sp.lock().unwrap().insert(pid, sp);
    }

    /// 读取保存的用户栈指针
    pub fn saved_sp(&self, pid: usize) -> Option<usize> {
        self.saved_sp.lock().unwrap().get(&pid).copied()
    }

    /// 终止进程
    pub fn terminate(&self, pid: usize, status: i32) {
        self.terminated.lock().unwrap().push((pid, status));
    }

    /// 被终止进程的退出状态
    pub fn exit_status(&self, pid: usize) -> Option<i32> {
        self.terminated
            .lock()
            .unwrap()
            .iter()
            .find(|(p, _)| *p == pid)
            .map(|(_, s)| *s)
    }

    /// 所有终止记录
    pub fn terminated(&self) -> Vec<(usize, i32)> {
        self.terminated.lock().unwrap().clone()
    }
}
