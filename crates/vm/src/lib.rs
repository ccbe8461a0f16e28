//! 按需分页虚拟内存子系统
//!
//! 决定每个进程的每个虚拟页由物理帧、文件还是交换区支撑，
//! 并在内存压力下在这些状态之间迁移页面。
//!
//! # 组成
//!
//! - [`FramePool`]: 物理帧池，帧耗尽时以时钟算法驱逐
//! - [`SupplementalPageTable`]: 每进程的补充页表，记录如何重建每个虚拟页
//! - [`SwapStore`]: 交换区，按页大小划分的槽位与占用位图
//! - [`fault`]: 缺页处理，决定栈增长、文件加载、交换加载或终止进程
//! - [`Vm`]: 组合根，提供加载、mmap、退出等入口
//!
//! # 架构解耦
//!
//! 页目录、文件、块设备和进程管理均为外部协作者，通过
//! [`PageDirectory`]、[`MmInode`]、[`BlockDevice`]、[`ProcessOps`] 抽象。
//! 使用前必须调用 [`register_arch_ops`] 注册地址转换实现。

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

mod arch_ops;
mod block;
mod config;
mod error;
mod file;
mod page_dir;
mod process;
mod util;

pub mod address;
pub mod fault;
pub mod frame;
pub mod page;
pub mod space;
pub mod swap;
pub mod vm;

#[cfg(test)]
mod tests;

pub use arch_ops::{arch_ops, register_arch_ops, ArchMmOps};
pub use block::BlockDevice;
pub use config::{VmConfig, PAGE_SIZE, SECTORS_PER_PAGE, SECTOR_SIZE};
pub use error::{FaultError, VmError, VmResult};
pub use file::MmInode;
pub use page_dir::PageDirectory;
pub use process::{Pid, ProcessOps, Tid};

// Re-export 常用类型
pub use address::{Address, PageNum, Paddr, Ppn, UsizeConvert, Vaddr, Vpn, VpnRange};
pub use fault::{handle_page_fault, FaultFlags, FaultInfo, FaultKind};
pub use frame::{EvictDestination, EvictionReport, Frame, FrameId, FramePool};
pub use page::{Backing, FileRange, Origin, PageEntry, SupplementalPageTable};
pub use space::{AddressSpace, MapId, MmapRegion};
pub use swap::{SwapSlot, SwapStore};
pub use vm::{init, vm, Vm, VmStats};
