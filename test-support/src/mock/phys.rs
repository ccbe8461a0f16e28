//! 物理内存区域的 Mock 实现
//!
//! 在宿主机堆上分配按页对齐的内存，配合恒等映射的地址转换，
//! 作为帧池管理的"物理内存"。

use std::alloc::{alloc_zeroed, dealloc, Layout};

/// Mock 页大小
pub const MOCK_PAGE_SIZE: usize = 4096;

/// 按页对齐的一段"物理内存"
pub struct MockPhysRegion {
    base: *mut u8,
    layout: Layout,
}

impl MockPhysRegion {
    /// 分配 `pages` 页、已清零的内存
    pub fn new(pages: usize) -> Self {
        assert!(pages > 0, "MockPhysRegion: empty region");
        let layout = Layout::from_size_align(pages * MOCK_PAGE_SIZE, MOCK_PAGE_SIZE)
            .expect("MockPhysRegion: bad layout");
        // SAFETY: layout 大小非零
        let base = unsafe { alloc_zeroed(layout) };
        assert!(!base.is_null(), "MockPhysRegion: host allocation failed");
        Self { base, layout }
    }

    /// 起始地址（包含）
    pub fn start(&self) -> usize {
        self.base as usize
    }

    /// 结束地址（不包含）
    pub fn end(&self) -> usize {
        self.base as usize + self.layout.size()
    }

    /// 页数
    pub fn pages(&self) -> usize {
        self.layout.size() / MOCK_PAGE_SIZE
    }
}

impl Drop for MockPhysRegion {
    fn drop(&mut self) {
        // SAFETY: base 由 alloc_zeroed 以同一 layout 分配
        unsafe { dealloc(self.base, self.layout) };
    }
}

// 区域只以地址形式交给被测代码，访问同步由被测代码负责
unsafe impl Send for MockPhysRegion {}
unsafe impl Sync for MockPhysRegion {}
