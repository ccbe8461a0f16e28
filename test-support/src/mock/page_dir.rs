//! 页目录（硬件页表）的 Mock 实现
//!
//! 以虚拟页号为键记录映射，访问位/脏位由测试通过 [`MockPageDirectory::touch`]
//! 模拟 MMU 设置。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// 一条模拟的硬件页表项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockPte {
    /// 物理页号
    pub ppn: usize,
    /// 是否可写
    pub writable: bool,
    /// 访问位
    pub accessed: bool,
    /// 脏位
    pub dirty: bool,
}

/// 模拟的单进程页目录
#[derive(Default)]
pub struct MockPageDirectory {
    entries: Mutex<BTreeMap<usize, MockPte>>,
    fail_map: AtomicBool,
}

impl MockPageDirectory {
    /// 创建空页目录
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后的 map 调用全部失败（模拟页表页分配失败）
    pub fn set_fail_map(&self, fail: bool) {
        self.fail_map.store(fail, Ordering::SeqCst);
    }

    /// 建立映射；已映射时失败
    pub fn map(&self, vpn: usize, ppn: usize, writable: bool) -> bool {
        if self.fail_map.load(Ordering::SeqCst) {
            return false;
        }
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(&vpn) {
            return false;
        }
        entries.insert(
            vpn,
            MockPte {
                ppn,
                writable,
                accessed: false,
                dirty: false,
            },
        );
        true
    }

    /// 解除映射
    pub fn unmap(&self, vpn: usize) {
        self.entries.lock().unwrap().remove(&vpn);
    }

    /// 查询映射
    pub fn get(&self, vpn: usize) -> Option<MockPte> {
        self.entries.lock().unwrap().get(&vpn).copied()
    }

    /// 虚拟页号到物理页号
    pub fn translate(&self, vpn: usize) -> Option<usize> {
        self.get(vpn).map(|pte| pte.ppn)
    }

    /// 模拟一次访存：设置访问位，写访问同时设置脏位
    ///
    /// 页未映射或对只读页写入时返回 false（即硬件会产生缺页）。
    pub fn touch(&self, vpn: usize, write: bool) -> bool {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(&vpn) {
            Some(pte) if write && !pte.writable => false,
            Some(pte) => {
                pte.accessed = true;
                pte.dirty |= write;
                true
            }
            None => false,
        }
    }

    /// 访问位
    pub fn is_accessed(&self, vpn: usize) -> bool {
        self.get(vpn).is_some_and(|pte| pte.accessed)
    }

    /// 设置访问位
    pub fn set_accessed(&self, vpn: usize, accessed: bool) {
        if let Some(pte) = self.entries.lock().unwrap().get_mut(&vpn) {
            pte.accessed = accessed;
        }
    }

    /// 脏位
    pub fn is_dirty(&self, vpn: usize) -> bool {
        self.get(vpn).is_some_and(|pte| pte.dirty)
    }

    /// 设置脏位
    pub fn set_dirty(&self, vpn: usize, dirty: bool) {
        if let Some(pte) = self.entries.lock().unwrap().get_mut(&vpn) {
            pte.dirty = dirty;
        }
    }

    /// 当前映射数
    pub fn mapped_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}
