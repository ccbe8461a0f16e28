//! 内部工具

pub mod bitmap;
