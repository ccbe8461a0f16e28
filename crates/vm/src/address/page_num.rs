//! 页号抽象模块
//!
//! 页号是地址空间中页的索引，它将分页逻辑与具体的字节地址解耦。

use super::types::{Address, Paddr, UsizeConvert, Vaddr};
use crate::config::PAGE_SIZE;

/// 表示一个页号的 Trait。[`Ppn`] 和 [`Vpn`] 都实现此 Trait。
pub trait PageNum: UsizeConvert + Copy + Clone + PartialEq + PartialOrd + Eq + Ord {
    /// 此页号类型关联的地址类型（Ppn 关联 Paddr，Vpn 关联 Vaddr）
    type TAddress: Address;

    /// 将页号增加 1
    fn step(&mut self) {
        *self = Self::from_usize(self.as_usize() + 1);
    }

    /// 将地址转换为包含它的页的页号（向下取整）
    fn from_addr_floor(addr: Self::TAddress) -> Self {
        Self::from_usize(addr.as_usize() / PAGE_SIZE)
    }

    /// 将地址转换为页号（向上取整）
    ///
    /// 页起始地址返回该页；页内地址返回下一页。
    fn from_addr_ceil(addr: Self::TAddress) -> Self {
        Self::from_usize(addr.align_up_to_page().as_usize() / PAGE_SIZE)
    }

    /// 页的起始地址
    fn start_addr(self) -> Self::TAddress {
        Self::TAddress::from_usize(self.as_usize() * PAGE_SIZE)
    }

    /// 页的结束地址（即下一页的起始地址，不包含在页内）
    fn end_addr(self) -> Self::TAddress {
        Self::TAddress::from_usize((self.as_usize() + 1) * PAGE_SIZE)
    }
}

/// 快速为给定类型实现 `UsizeConvert` 和 `PageNum` Trait
macro_rules! impl_page_num {
    ($type:ty, $addr_type:ty) => {
        impl UsizeConvert for $type {
            fn as_usize(&self) -> usize {
                self.0
            }

            fn from_usize(value: usize) -> Self {
                Self(value)
            }
        }

        impl PageNum for $type {
            type TAddress = $addr_type;
        }

        impl core::ops::Add<usize> for $type {
            type Output = Self;

            fn add(self, rhs: usize) -> Self {
                Self(self.0 + rhs)
            }
        }

        impl core::ops::Sub<usize> for $type {
            type Output = Self;

            fn sub(self, rhs: usize) -> Self {
                Self(self.0 - rhs)
            }
        }
    };
}

/// 物理页号 (Physical Page Number)，对应物理地址 [`Paddr`]
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Ppn(pub usize);
impl_page_num!(Ppn, Paddr);

/// 虚拟页号 (Virtual Page Number)，对应虚拟地址 [`Vaddr`]
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Vpn(pub usize);
impl_page_num!(Vpn, Vaddr);

/// 泛型页号范围结构，表示半开区间 `[start, end)`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageNumRange<T: PageNum> {
    /// 范围的起始页号（包含）
    pub start: T,
    /// 范围的结束页号（不包含）
    pub end: T,
}

impl<T: PageNum> PageNumRange<T> {
    /// 创建一个新的页号范围
    pub fn new(start: T, end: T) -> Self {
        Self { start, end }
    }

    /// 从起始页号和页数创建范围
    pub fn from_start_len(start: T, len: usize) -> Self {
        Self {
            start,
            end: T::from_usize(start.as_usize() + len),
        }
    }

    /// 范围内的页数
    pub fn len(&self) -> usize {
        debug_assert!(self.end >= self.start);
        self.end.as_usize() - self.start.as_usize()
    }

    /// 范围是否为空
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// 是否包含给定页号
    pub fn contains(&self, page: T) -> bool {
        page >= self.start && page < self.end
    }

    /// 两个范围是否重叠（相邻不算重叠）
    pub fn overlaps(&self, other: &Self) -> bool {
        !(self.end <= other.start || self.start >= other.end)
    }

    /// 按升序遍历范围内的页号
    pub fn iter(&self) -> PageNumRangeIterator<T> {
        PageNumRangeIterator {
            end: self.end,
            current: self.start,
        }
    }
}

impl<T: PageNum> IntoIterator for PageNumRange<T> {
    type Item = T;
    type IntoIter = PageNumRangeIterator<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// 页号范围的迭代器
pub struct PageNumRangeIterator<T: PageNum> {
    end: T,
    current: T,
}

impl<T: PageNum> Iterator for PageNumRangeIterator<T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current >= self.end {
            return None;
        }
        let result = self.current;
        self.current.step();
        Some(result)
    }
}

/// 虚拟页号范围的类型别名
pub type VpnRange = PageNumRange<Vpn>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_num_start_end_addr() {
        let vpn = Vpn::from_usize(1);
        assert_eq!(vpn.start_addr().as_usize(), 4096);
        assert_eq!(vpn.end_addr().as_usize(), 8192);
    }

    #[test]
    fn test_page_num_from_addr_floor_ceil() {
        let a = Vaddr::from_usize(4096);
        assert_eq!(Vpn::from_addr_floor(a).as_usize(), 1);
        assert_eq!(Vpn::from_addr_ceil(a).as_usize(), 1);

        let b = Vaddr::from_usize(4097);
        assert_eq!(Vpn::from_addr_floor(b).as_usize(), 1);
        assert_eq!(Vpn::from_addr_ceil(b).as_usize(), 2);
        assert_eq!(b.page_offset(), 1);
        assert!(!b.is_page_aligned());
    }

    #[test]
    fn test_range_overlap_and_iter() {
        let r = VpnRange::from_start_len(Vpn(10), 3);
        assert_eq!(r.len(), 3);
        assert!(r.contains(Vpn(12)));
        assert!(!r.contains(Vpn(13)));
        assert!(r.overlaps(&VpnRange::new(Vpn(12), Vpn(20))));
        assert!(!r.overlaps(&VpnRange::new(Vpn(13), Vpn(20))));

        let pages: std::vec::Vec<Vpn> = r.iter().collect();
        assert_eq!(pages, std::vec![Vpn(10), Vpn(11), Vpn(12)]);
    }
}
