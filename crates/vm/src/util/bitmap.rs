//! 位图
//!
//! 每个 bit 表示一个资源单元（0=空闲，1=已占用），使用 `Vec<u64>` 存储，
//! 查找时快速跳过全满的 u64。物理帧分配器与交换槽分配都基于它。

use alloc::vec::Vec;

/// 定长位图
#[derive(Debug, Clone)]
pub struct Bitmap {
    words: Vec<u64>,
    len: usize,
    used: usize,
}

impl Bitmap {
    /// 创建 `len` 位、全部空闲的位图
    pub fn new(len: usize) -> Self {
        Self {
            words: alloc::vec![0u64; len.div_ceil(64)],
            len,
            used: 0,
        }
    }

    /// 总位数
    pub fn len(&self) -> usize {
        self.len
    }

    /// 已占用位数
    pub fn used(&self) -> usize {
        self.used
    }

    /// 空闲位数
    pub fn free(&self) -> usize {
        self.len - self.used
    }

    /// 检查某位是否已占用
    #[inline]
    pub fn is_set(&self, idx: usize) -> bool {
        debug_assert!(idx < self.len);
        (self.words[idx / 64] & (1u64 << (idx % 64))) != 0
    }

    /// 标记为已占用
    ///
    /// # Panics
    /// 该位已被占用时 panic
    #[inline]
    pub fn set(&mut self, idx: usize) {
        assert!(!self.is_set(idx), "bitmap: bit {} already set", idx);
        self.words[idx / 64] |= 1u64 << (idx % 64);
        self.used += 1;
    }

    /// 标记为空闲
    ///
    /// # Panics
    /// 该位本就空闲时 panic（重复释放）
    #[inline]
    pub fn clear(&mut self, idx: usize) {
        assert!(self.is_set(idx), "bitmap: double free of bit {}", idx);
        self.words[idx / 64] &= !(1u64 << (idx % 64));
        self.used -= 1;
    }

    /// 从 `hint` 所在的 u64 开始循环查找第一个空闲位
    ///
    /// 查找顺序为 `[hint, end)` 再 `[0, hint)`，返回的位尚未被标记。
    pub fn find_free_from(&self, hint: usize) -> Option<usize> {
        let words = self.words.len();
        if words == 0 || self.used == self.len {
            return None;
        }
        let start_word = (hint / 64) % words;

        for offset in 0..words {
            let idx = (start_word + offset) % words;
            let word = self.words[idx];

            // 快速跳过全满的 u64
            if word == u64::MAX {
                continue;
            }

            // 找到第一个空闲位（trailing_zeros 找最低位的 0）
            let bit = idx * 64 + (!word).trailing_zeros() as usize;
            if bit < self.len {
                return Some(bit);
            }
        }

        None
    }

    /// 查找编号最小的空闲位
    pub fn find_first_free(&self) -> Option<usize> {
        self.find_free_from(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_set_clear() {
        let mut bm = Bitmap::new(70);
        assert_eq!(bm.find_first_free(), Some(0));
        for i in 0..65 {
            bm.set(i);
        }
        assert_eq!(bm.used(), 65);
        assert_eq!(bm.find_first_free(), Some(65));

        bm.clear(3);
        assert_eq!(bm.find_first_free(), Some(3));
        // hint 指向第二个 u64 时先找到 65
        assert_eq!(bm.find_free_from(64), Some(65));
    }

    #[test]
    fn test_tail_bits_are_not_handed_out() {
        let mut bm = Bitmap::new(3);
        for _ in 0..3 {
            let bit = bm.find_first_free().unwrap();
            bm.set(bit);
        }
        assert_eq!(bm.free(), 0);
        assert_eq!(bm.find_first_free(), None);
    }

    #[test]
    #[should_panic]
    fn test_double_clear_panics() {
        let mut bm = Bitmap::new(8);
        bm.set(1);
        bm.clear(1);
        bm.clear(1);
    }
}
