//! 时钟（second-chance）置换游标
//!
//! 活跃帧按加入顺序排成环，游标指向下一个被检查的帧。
//! 删除游标之前的帧时游标前移一位，使其仍指向同一个帧；
//! 删除游标处的帧后游标自然指向下一个帧。

use super::FrameId;
use alloc::vec::Vec;

/// 活跃帧环与全局游标
#[derive(Debug, Default)]
pub struct Clock {
    live: Vec<FrameId>,
    hand: usize,
}

impl Clock {
    /// 创建空环
    pub fn new() -> Self {
        Self::default()
    }

    /// 活跃帧数
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// 环是否为空
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// 加入新帧，放在游标之前（最后才会被检查）
    pub fn insert(&mut self, id: FrameId) {
        if self.live.is_empty() {
            self.live.push(id);
            self.hand = 0;
        } else {
            self.live.insert(self.hand, id);
            self.hand += 1;
        }
    }

    /// 游标当前指向的帧
    pub fn current(&self) -> Option<FrameId> {
        self.live.get(self.hand).copied()
    }

    /// 游标前进一位
    pub fn advance(&mut self) {
        if !self.live.is_empty() {
            self.hand = (self.hand + 1) % self.live.len();
        }
    }

    /// 从环中删除帧，返回是否存在
    pub fn remove(&mut self, id: FrameId) -> bool {
        let Some(pos) = self.live.iter().position(|&f| f == id) else {
            return false;
        };
        self.live.remove(pos);
        if pos < self.hand {
            self.hand -= 1;
        }
        if self.hand >= self.live.len() {
            self.hand = 0;
        }
        true
    }

    /// 遍历活跃帧（从游标开始的顺序无关）
    pub fn iter(&self) -> impl Iterator<Item = FrameId> + '_ {
        self.live.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_frames_are_visited_last() {
        let mut clock = Clock::new();
        clock.insert(FrameId(1));
        clock.insert(FrameId(2));
        clock.insert(FrameId(3));
        assert_eq!(clock.current(), Some(FrameId(1)));

        clock.advance();
        assert_eq!(clock.current(), Some(FrameId(2)));
        // 新帧插在游标之前，绕一圈后才被检查
        clock.insert(FrameId(4));
        assert_eq!(clock.current(), Some(FrameId(2)));
        clock.advance();
        clock.advance();
        assert_eq!(clock.current(), Some(FrameId(1)));
        clock.advance();
        assert_eq!(clock.current(), Some(FrameId(4)));
    }

    #[test]
    fn test_remove_keeps_hand_on_same_frame() {
        let mut clock = Clock::new();
        for i in 0..4 {
            clock.insert(FrameId(i));
        }
        clock.advance();
        clock.advance();
        assert_eq!(clock.current(), Some(FrameId(2)));

        assert!(clock.remove(FrameId(0)));
        assert_eq!(clock.current(), Some(FrameId(2)));

        // 删除游标处的帧后指向下一个
        assert!(clock.remove(FrameId(2)));
        assert_eq!(clock.current(), Some(FrameId(3)));

        // 删除末尾的帧后回绕到开头
        assert!(clock.remove(FrameId(3)));
        assert_eq!(clock.current(), Some(FrameId(1)));
        assert!(!clock.remove(FrameId(3)));
        assert_eq!(clock.len(), 1);
    }
}
