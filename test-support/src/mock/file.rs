//! 内存文件的 Mock 实现

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::vec::Vec;

/// Mock 文件的错误码（-EIO）
pub const MOCK_EIO: isize = -5;

/// 长度固定的内存文件
///
/// 与原内核的文件语义一致：写入不会扩展文件，越界部分被截断。
pub struct MockFile {
    data: Mutex<Vec<u8>>,
    failing: AtomicBool,
    writes: AtomicUsize,
}

impl MockFile {
    /// 以给定内容创建文件
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data: Mutex::new(data),
            failing: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }

    /// 之后的读写全部失败（或恢复正常）
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// 从 `offset` 处读取，返回实际读取的字节数
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MOCK_EIO);
        }
        let data = self.data.lock().unwrap();
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    /// 向 `offset` 处写入，返回实际写入的字节数
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, isize> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MOCK_EIO);
        }
        let mut data = self.data.lock().unwrap();
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        data[offset..offset + n].copy_from_slice(&buf[..n]);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(n)
    }

    /// 文件长度
    pub fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    /// 文件是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 成功的写调用次数
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// 文件内容快照
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_does_not_extend() {
        let f = MockFile::from_bytes(std::vec![0u8; 10]);
        assert_eq!(f.write_at(8, &[1, 2, 3, 4]), Ok(2));
        assert_eq!(f.len(), 10);
        assert_eq!(&f.contents()[8..], &[1, 2]);
        assert_eq!(f.write_at(10, &[1]), Ok(0));
    }
}
