//! 测试支持 crate
//!
//! 提供分页子系统外部协作者的 Mock 实现：物理内存区域、块设备、
//! 文件、页目录和进程表。
//!
//! 这里不依赖 `vm` crate（避免循环依赖）。Mock 只提供固有方法，
//! `vm` 在 `cfg(test)` 下为它们实现自己的 trait。

pub mod mock;
