//! 每进程页目录（硬件页表）接口
//!
//! 页目录由内核按架构实现，本 crate 只消费它：建立/解除映射，
//! 以及读写硬件维护的访问位和脏位。

use crate::address::{Ppn, Vpn};

/// 每进程页目录
pub trait PageDirectory: Send + Sync {
    /// 映射虚拟页到物理页
    ///
    /// 页表页分配失败或该页已被映射时返回 false。
    fn map(&self, vpn: Vpn, ppn: Ppn, writable: bool) -> bool;

    /// 解除映射，之后对该页的访问会产生缺页
    fn unmap(&self, vpn: Vpn);

    /// 查询虚拟页当前映射的物理页
    fn translate(&self, vpn: Vpn) -> Option<Ppn>;

    /// 访问位
    fn is_accessed(&self, vpn: Vpn) -> bool;

    /// 设置访问位
    fn set_accessed(&self, vpn: Vpn, accessed: bool);

    /// 脏位
    fn is_dirty(&self, vpn: Vpn) -> bool;

    /// 设置脏位
    fn set_dirty(&self, vpn: Vpn, dirty: bool);

    /// 清除访问位
    fn clear_accessed(&self, vpn: Vpn) {
        self.set_accessed(vpn, false);
    }

    /// 清除脏位
    fn clear_dirty(&self, vpn: Vpn) {
        self.set_dirty(vpn, false);
    }
}
