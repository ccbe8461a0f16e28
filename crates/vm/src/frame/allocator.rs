//! 物理帧分配器
//!
//! 采用位图策略跟踪每个物理帧的分配状态：
//!
//! - **bitmap**：每个 bit 表示一个物理帧（0=空闲，1=已分配）
//! - **last_alloc_hint**：上次分配位置提示，利用局部性加速查找
//!
//! 释放时直接清除对应 bit。分配器不了解帧的用途，
//! 帧与页的关联由 [`FramePool`](super::FramePool) 维护。

use crate::address::{PageNum, Paddr, Ppn, UsizeConvert};
use crate::util::bitmap::Bitmap;

/// 物理帧分配器
#[derive(Debug)]
pub struct FrameAllocator {
    /// 物理帧的起始 Ppn
    start: Ppn,
    /// 物理帧的结束 Ppn（不包含）
    end: Ppn,
    /// 分配位图
    bitmap: Bitmap,
    /// 上次分配的位置提示
    last_alloc_hint: usize,
}

impl FrameAllocator {
    /// 使用可用的物理内存范围创建分配器
    ///
    /// 起始地址向上取整、结束地址向下取整到页边界。
    pub fn new(start_addr: Paddr, end_addr: Paddr) -> Self {
        let start = Ppn::from_addr_ceil(start_addr);
        let end = Ppn::from_addr_floor(end_addr).max(start);
        Self {
            start,
            end,
            bitmap: Bitmap::new(end.as_usize() - start.as_usize()),
            last_alloc_hint: 0,
        }
    }

    /// 第一个可分配的物理页号
    pub fn start(&self) -> Ppn {
        self.start
    }

    /// 帧在分配器内的下标
    pub fn index_of(&self, ppn: Ppn) -> usize {
        debug_assert!(ppn >= self.start && ppn < self.end, "frame out of range");
        ppn.as_usize() - self.start.as_usize()
    }

    /// 分配一个物理帧，从 last_alloc_hint 开始循环查找
    pub fn alloc(&mut self) -> Option<Ppn> {
        let idx = self.bitmap.find_free_from(self.last_alloc_hint)?;
        self.bitmap.set(idx);
        self.last_alloc_hint = idx;
        Some(self.start + idx)
    }

    /// 回收一个物理帧
    ///
    /// # Panics
    /// 重复释放时 panic
    pub fn dealloc(&mut self, ppn: Ppn) {
        let idx = self.index_of(ppn);
        self.bitmap.clear(idx);
    }

    /// 总的物理帧数
    pub fn total_frames(&self) -> usize {
        self.bitmap.len()
    }

    /// 已分配的帧数
    pub fn allocated_frames(&self) -> usize {
        self.bitmap.used()
    }

    /// 空闲的帧数
    pub fn free_frames(&self) -> usize {
        self.bitmap.free()
    }
}
