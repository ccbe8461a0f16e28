//! Mock 实现模块

pub mod arch;
pub mod block;
pub mod file;
pub mod page_dir;
pub mod phys;
pub mod process;
