//! 地址模块
//!
//! 提供物理地址、虚拟地址和页号的强类型封装。
//!
//! # 地址类型
//!
//! - [`Paddr`] - 物理地址
//! - [`Vaddr`] - 虚拟地址
//!
//! # 页号
//!
//! - [`PageNum`] - 表示页号的 Trait
//! - [`Ppn`] - 物理页号
//! - [`Vpn`] - 虚拟页号
//! - [`VpnRange`] - 虚拟页号范围 `[start, end)`
//!
//! 页大小固定为 [`PAGE_SIZE`](crate::PAGE_SIZE)。
mod page_num;
mod types;

pub use page_num::{PageNum, PageNumRange, Ppn, Vpn, VpnRange};
pub use types::{Address, Paddr, UsizeConvert, Vaddr};
