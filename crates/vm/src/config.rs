//! 分页子系统的配置常量

/// 页大小（字节），只支持这一种
pub const PAGE_SIZE: usize = 4096;

/// 交换设备扇区大小（字节）
pub const SECTOR_SIZE: usize = 512;

/// 每个交换槽占用的扇区数
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

/// 用户地址空间布局与栈增长策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// 最低的合法用户地址
    pub user_base: usize,
    /// 用户地址空间上界（不包含），其上为内核空间
    pub user_top: usize,
    /// 用户栈最大尺寸（字节），栈区为 `[user_top - max_stack_size, user_top)`
    pub max_stack_size: usize,
    /// 栈指针以下可视为栈增长的最大距离（字节）
    ///
    /// 覆盖 PUSH/PUSHA 在调整栈指针前的访存，以及先访问再下移栈指针的代码。
    pub stack_growth_window: usize,
    /// 栈区底部的保护页数，访问保护页视为栈溢出
    pub stack_guard_pages: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            user_base: 0x0804_8000,
            user_top: 0xC000_0000,
            max_stack_size: 8 * 1024 * 1024,
            stack_growth_window: 64 * 1024,
            stack_guard_pages: 1,
        }
    }
}

impl VmConfig {
    /// 栈区最低地址（包含保护页）
    pub fn stack_bottom(&self) -> usize {
        self.user_top - self.max_stack_size
    }

    /// 保护页之上、栈可以增长到的最低地址
    pub fn stack_limit(&self) -> usize {
        self.stack_bottom() + self.stack_guard_pages * PAGE_SIZE
    }

    /// 地址是否落在用户可用范围内
    pub fn is_user_addr(&self, addr: usize) -> bool {
        addr >= self.user_base && addr < self.user_top
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let cfg = VmConfig::default();
        assert_eq!(SECTORS_PER_PAGE, 8);
        assert_eq!(cfg.stack_bottom(), 0xBF80_0000);
        assert_eq!(cfg.stack_limit(), 0xBF80_1000);
        assert!(cfg.is_user_addr(0x0804_8000));
        assert!(!cfg.is_user_addr(0x0804_7FFF));
        assert!(!cfg.is_user_addr(0xC000_0000));
    }
}
