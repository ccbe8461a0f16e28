//! 内存模拟块设备
//!
//! 用作交换分区，支持注入 I/O 失败。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::vec;
use std::vec::Vec;

/// 内存模拟的块设备
pub struct MockBlockDevice {
    data: Mutex<Vec<u8>>,
    block_size: usize,
    failing: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MockBlockDevice {
    /// 创建 `blocks` 个块、每块 `block_size` 字节的设备
    pub fn new(blocks: usize, block_size: usize) -> Self {
        Self {
            data: Mutex::new(vec![0u8; blocks * block_size]),
            block_size,
            failing: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// 之后的读写全部失败（或恢复正常）
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// 读取块
    pub fn read_block(&self, block_id: usize, buf: &mut [u8]) -> bool {
        if buf.len() != self.block_size || self.failing.load(Ordering::SeqCst) {
            return false;
        }
        let data = self.data.lock().unwrap();
        let offset = block_id * self.block_size;
        if offset + self.block_size > data.len() {
            return false;
        }
        buf.copy_from_slice(&data[offset..offset + self.block_size]);
        self.reads.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// 写入块
    pub fn write_block(&self, block_id: usize, buf: &[u8]) -> bool {
        if buf.len() != self.block_size || self.failing.load(Ordering::SeqCst) {
            return false;
        }
        let mut data = self.data.lock().unwrap();
        let offset = block_id * self.block_size;
        if offset + self.block_size > data.len() {
            return false;
        }
        data[offset..offset + self.block_size].copy_from_slice(buf);
        self.writes.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// 块大小（字节）
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// 总块数
    pub fn total_blocks(&self) -> usize {
        self.data.lock().unwrap().len() / self.block_size
    }

    /// 成功读取的块数
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// 成功写入的块数
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// 获取原始数据（用于断言磁盘布局）
    pub fn raw_data(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_read_write_roundtrip() {
        let dev = MockBlockDevice::new(8, 512);
        assert_eq!(dev.total_blocks(), 8);

        let mut wbuf = [0u8; 512];
        wbuf[0] = 0xAA;
        wbuf[511] = 0x55;
        assert!(dev.write_block(3, &wbuf));

        let mut rbuf = [0u8; 512];
        assert!(dev.read_block(3, &mut rbuf));
        assert_eq!(rbuf, wbuf);
        assert!(!dev.read_block(8, &mut rbuf));

        dev.set_failing(true);
        assert!(!dev.write_block(0, &wbuf));
    }
}
