//! 文件接口 trait 定义

/// 可用于按需加载和 mmap 写回的文件接口
///
/// 实现者自行负责内部加锁；允许在持有帧池锁时调用。
pub trait MmInode: Send + Sync {
    /// 从指定偏移读取数据到缓冲区，返回实际读取的字节数
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize>;

    /// 将缓冲区数据写入指定偏移，返回实际写入的字节数
    ///
    /// 写入不会扩展文件。
    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, isize>;

    /// 文件长度（字节）
    fn len(&self) -> usize;

    /// 文件是否为空
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
