//! 物理帧池
//!
//! 管理有限的物理帧集合：分配、释放，并在耗尽时以时钟算法驱逐。
//!
//! ## 帧与页的关联
//!
//! 帧以下标 [`FrameId`]（相对于第一个可分配物理页）标识，补充页表的驻留项
//! 记录帧下标，帧表项记录所有者和所承载的虚拟页，两侧互相一致。
//!
//! 新分配的帧在填充完成、安装进页表之前处于"在途"状态（没有关联的页），
//! 时钟扫描会跳过它。填充（读文件、读交换区）在帧池锁之外完成。
//!
//! ## 时钟算法
//!
//! 全局游标在活跃帧环上循环：
//!
//! 1. 访问位为 1：清零，游标前进（第二次机会）
//! 2. 否则选中该帧，按页的来源决定去向：
//!    - mmap 文件页：脏则写回文件，页表项变为 FileBacked
//!    - 可执行段文件页：干净则直接丢弃（可从文件重建），脏则写入交换区
//!    - 匿名页：总是写入交换区
//!
//! 游标总会越过被检查的帧。只要存在可驱逐的帧，一圈内必定选中。
//!
//! 整个分配/驱逐过程在帧池锁内完成：帧 F 的写出、页表项转换、解除映射
//! 全部完成之前，F 不会被再次分配。

mod allocator;
mod clock;

pub use allocator::FrameAllocator;
pub use clock::Clock;

use crate::address::{PageNum, Paddr, Ppn, UsizeConvert, Vpn};
use crate::arch_ops::arch_ops;
use crate::config::PAGE_SIZE;
use crate::error::{VmError, VmResult};
use crate::page::{Backing, Origin};
use crate::process::Pid;
use crate::space::AddressSpace;
use crate::swap::{SwapSlot, SwapStore};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use sync::SpinLock;

/// 帧下标
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameId(pub usize);

/// 已分配给某个进程的物理帧
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    id: FrameId,
    ppn: Ppn,
}

impl Frame {
    /// 帧下标
    pub fn id(&self) -> FrameId {
        self.id
    }

    /// 物理页号
    pub fn ppn(&self) -> Ppn {
        self.ppn
    }
}

/// 获取帧内容的可变切片
///
/// # Safety
/// 调用者必须保证此期间没有其他代码访问该帧：帧处于在途状态，
/// 或者已解除用户映射且持有帧池锁。
pub(crate) unsafe fn frame_bytes<'a>(ppn: Ppn) -> &'a mut [u8] {
    let va = arch_ops().paddr_to_vaddr(ppn.start_addr().as_usize());
    unsafe { core::slice::from_raw_parts_mut(va as *mut u8, PAGE_SIZE) }
}

/// 驱逐页的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictDestination {
    /// 干净的文件页，直接丢弃
    Discarded,
    /// 脏的 mmap 页，已写回文件
    File,
    /// 已写入交换槽
    Swap(SwapSlot),
}

/// 一次驱逐的结果
#[derive(Debug, Clone, Copy)]
pub struct EvictionReport {
    /// 受害页所属进程
    pub pid: Pid,
    /// 受害页
    pub vpn: Vpn,
    /// 被释放的帧
    pub frame: Frame,
    /// 本次检查的帧数（包括被选中的帧）
    pub inspected: usize,
    /// 页的去向
    pub destination: EvictDestination,
}

struct FrameEntry {
    owner: Arc<AddressSpace>,
    /// 在途帧为 None
    vpn: Option<Vpn>,
}

struct PoolInner {
    allocator: FrameAllocator,
    frames: Vec<Option<FrameEntry>>,
    clock: Clock,
}

impl PoolInner {
    fn frame(&self, id: FrameId) -> Frame {
        Frame {
            id,
            ppn: self.allocator.start() + id.0,
        }
    }

    fn entry(&self, id: FrameId) -> &FrameEntry {
        self.frames[id.0]
            .as_ref()
            .unwrap_or_else(|| panic!("frame {} is not live", id.0))
    }

    /// 从活跃集合移除并归还分配器
    fn free(&mut self, id: FrameId) {
        let removed = self.clock.remove(id);
        debug_assert!(removed, "frame {} missing from clock", id.0);
        self.frames[id.0] = None;
        let ppn = self.allocator.start() + id.0;
        self.allocator.dealloc(ppn);
    }
}

/// 物理帧池
pub struct FramePool {
    inner: SpinLock<PoolInner>,
    swap: Arc<SwapStore>,
    evictions: AtomicUsize,
}

impl FramePool {
    /// 使用物理内存范围 `[start, end)` 创建帧池
    pub fn new(start: Paddr, end: Paddr, swap: Arc<SwapStore>) -> Self {
        let allocator = FrameAllocator::new(start, end);
        let total = allocator.total_frames();
        let mut frames = Vec::with_capacity(total);
        frames.resize_with(total, || None);
        log::debug!("frame pool: {} frames from {:?}", total, allocator.start());
        Self {
            inner: SpinLock::new(PoolInner {
                allocator,
                frames,
                clock: Clock::new(),
            }),
            swap,
            evictions: AtomicUsize::new(0),
        }
    }

    /// 交换区
    pub fn swap(&self) -> &Arc<SwapStore> {
        &self.swap
    }

    /// 为 `owner` 分配一个帧
    ///
    /// 分配器耗尽时先驱逐一个帧；驱逐成功后仍分配失败返回 [`VmError::OutOfFrames`]。
    /// 返回的帧处于在途状态，需要由 [`install`](Self::install) 关联到页，
    /// 或由 [`release`](Self::release) 归还。
    pub fn allocate(&self, owner: &Arc<AddressSpace>, zero: bool) -> VmResult<Frame> {
        let frame = {
            let mut inner = self.inner.lock();
            let ppn = match inner.allocator.alloc() {
                Some(ppn) => ppn,
                None => {
                    self.evict_locked(&mut inner)?;
                    inner.allocator.alloc().ok_or_else(|| {
                        log::error!("frame pool: allocation failed after eviction");
                        VmError::OutOfFrames
                    })?
                }
            };
            let id = FrameId(inner.allocator.index_of(ppn));
            inner.frames[id.0] = Some(FrameEntry {
                owner: owner.clone(),
                vpn: None,
            });
            inner.clock.insert(id);
            Frame { id, ppn }
        };

        if zero {
            // SAFETY: 在途帧只被调用者访问
            unsafe { frame_bytes(frame.ppn) }.fill(0);
        }
        log::trace!("frame pool: pid {} got frame {}", owner.pid(), frame.id.0);
        Ok(frame)
    }

    /// 将在途帧安装为 `space` 中 `vpn` 的驻留页
    ///
    /// 建立页目录映射，并将补充页表项替换为 Resident。失败时帧仍处于在途状态。
    pub fn install(
        &self,
        frame: Frame,
        space: &Arc<AddressSpace>,
        vpn: Vpn,
        writable: bool,
        backing: Backing,
    ) -> VmResult<()> {
        let mut inner = self.inner.lock();
        let mut spt = space.spt();

        let entry = inner.frames[frame.id.0]
            .as_mut()
            .unwrap_or_else(|| panic!("install of free frame {}", frame.id.0));
        assert!(
            Arc::ptr_eq(&entry.owner, space) && entry.vpn.is_none(),
            "install of frame {} not in flight for pid {}",
            frame.id.0,
            space.pid()
        );

        if !space.page_dir().map(vpn, frame.ppn, writable) {
            log::error!("pid {}: page directory map of {:?} failed", space.pid(), vpn);
            return Err(VmError::OutOfMemory);
        }
        let origin = Origin::Resident {
            frame: frame.id,
            backing,
        };
        match spt.insert(vpn.start_addr(), writable, origin) {
            Ok(old) => {
                debug_assert!(!old.is_some_and(|e| e.origin.is_resident()));
            }
            Err(err) => {
                space.page_dir().unmap(vpn);
                return Err(err);
            }
        }
        entry.vpn = Some(vpn);
        Ok(())
    }

    /// 释放帧：移出活跃集合，解除页目录映射（若已关联），归还物理页
    ///
    /// 不修改补充页表，调用者负责表项。
    pub fn release(&self, frame: Frame) {
        let mut inner = self.inner.lock();
        let entry = inner.entry(frame.id);
        if let Some(vpn) = entry.vpn {
            entry.owner.page_dir().unmap(vpn);
            arch_ops().flush_tlb(vpn.as_usize());
        }
        inner.free(frame.id);
    }

    /// 驱逐一个帧
    pub fn evict_one(&self) -> VmResult<EvictionReport> {
        let mut inner = self.inner.lock();
        self.evict_locked(&mut inner)
    }

    fn evict_locked(&self, inner: &mut PoolInner) -> VmResult<EvictionReport> {
        let live = inner.clock.len();
        // 在途帧不可选，两圈之后仍没有选中就放弃
        let limit = 2 * live + 1;
        let mut inspected = 0;

        while inspected < limit {
            let Some(id) = inner.clock.current() else {
                break;
            };
            inspected += 1;

            let entry = inner.entry(id);
            let Some(vpn) = entry.vpn else {
                log::trace!("clock: frame {} in flight", id.0);
                inner.clock.advance();
                continue;
            };
            let owner = entry.owner.clone();

            let page_dir = owner.page_dir();
            if page_dir.is_accessed(vpn) {
                page_dir.clear_accessed(vpn);
                log::trace!("clock: frame {} (pid {}, {:?}) second chance", id.0, owner.pid(), vpn);
                inner.clock.advance();
                continue;
            }

            let frame = inner.frame(id);
            let destination = match self.page_out(&owner, vpn, frame) {
                Ok(dest) => dest,
                Err(err) => {
                    inner.clock.advance();
                    return Err(err);
                }
            };
            inner.free(id);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "clock: evicted frame {} (pid {}, {:?}) -> {:?} after {} inspections",
                id.0,
                owner.pid(),
                vpn,
                destination,
                inspected
            );
            return Ok(EvictionReport {
                pid: owner.pid(),
                vpn,
                frame,
                inspected,
                destination,
            });
        }

        log::error!("frame pool: no evictable frame among {} live frames", live);
        Err(VmError::OutOfFrames)
    }

    /// 保存受害页并转换其页表项；失败时恢复映射
    fn page_out(
        &self,
        owner: &AddressSpace,
        vpn: Vpn,
        frame: Frame,
    ) -> VmResult<EvictDestination> {
        let mut spt = owner.spt();
        let entry = spt
            .get_mut(vpn)
            .unwrap_or_else(|| panic!("pid {}: live frame for {:?} without entry", owner.pid(), vpn));
        let backing = match &entry.origin {
            Origin::Resident { frame: id, backing } if *id == frame.id => backing.clone(),
            other => panic!(
                "pid {}: {:?} backed by frame {} but entry is {:?}",
                owner.pid(),
                vpn,
                frame.id.0,
                other
            ),
        };

        let page_dir = owner.page_dir();
        let dirty = page_dir.is_dirty(vpn);
        page_dir.unmap(vpn);
        arch_ops().flush_tlb(vpn.as_usize());

        // SAFETY: 页已解除映射，且持有帧池锁
        let bytes = unsafe { frame_bytes(frame.ppn) };
        let result = match backing {
            Backing::File(range) if range.write_back => {
                if dirty {
                    range
                        .write_from(bytes)
                        .map(|_| (Origin::FileBacked(range), EvictDestination::File))
                } else {
                    Ok((Origin::FileBacked(range), EvictDestination::Discarded))
                }
            }
            Backing::File(range) if !dirty => {
                Ok((Origin::FileBacked(range), EvictDestination::Discarded))
            }
            _ => self
                .swap
                .write_out(bytes)
                .map(|slot| (Origin::Swapped(slot), EvictDestination::Swap(slot))),
        };

        match result {
            Ok((origin, destination)) => {
                entry.origin = origin;
                Ok(destination)
            }
            Err(err) => {
                assert!(
                    page_dir.map(vpn, frame.ppn, entry.writable),
                    "pid {}: failed to restore mapping of {:?}",
                    owner.pid(),
                    vpn
                );
                page_dir.set_dirty(vpn, dirty);
                log::warn!("pid {}: eviction of {:?} failed: {:?}", owner.pid(), vpn, err);
                Err(err)
            }
        }
    }

    /// 删除 `space` 中 `vpn` 的表项并释放其帧或交换槽
    ///
    /// `write_back` 为真时，脏的 mmap 驻留页先写回文件；写回失败仍会释放资源，
    /// 并返回错误。没有表项返回 [`VmError::NotMapped`]。
    pub fn release_page(&self, space: &Arc<AddressSpace>, vpn: Vpn, write_back: bool) -> VmResult<()> {
        let mut inner = self.inner.lock();
        let mut spt = space.spt();
        let entry = spt.remove(vpn.start_addr()).ok_or(VmError::NotMapped)?;

        match entry.origin {
            Origin::Resident { frame, backing } => {
                let page_dir = space.page_dir();
                let mut result = Ok(());
                if write_back && page_dir.is_dirty(vpn) {
                    if let Backing::File(range) = &backing {
                        if range.write_back {
                            // SAFETY: 持有帧池锁和补充页表锁，页不会被驱逐
                            result = range.write_from(unsafe { frame_bytes(inner.frame(frame).ppn) });
                        }
                    }
                }
                page_dir.unmap(vpn);
                arch_ops().flush_tlb(vpn.as_usize());
                inner.free(frame);
                result
            }
            Origin::Swapped(slot) => {
                self.swap.free(slot);
                Ok(())
            }
            Origin::FileBacked(_) => Ok(()),
        }
    }

    /// 回收进程的全部帧和交换槽，清空其补充页表
    ///
    /// 返回释放的帧数和交换槽数。
    pub fn reclaim_space(&self, space: &Arc<AddressSpace>) -> (usize, usize) {
        let mut inner = self.inner.lock();
        let mut spt = space.spt();
        let page_dir = space.page_dir();
        let (mut frames, mut slots) = (0, 0);

        for entry in spt.drain() {
            match entry.origin {
                Origin::Resident { frame, .. } => {
                    page_dir.unmap(entry.vpn);
                    arch_ops().flush_tlb(entry.vpn.as_usize());
                    inner.free(frame);
                    frames += 1;
                }
                Origin::Swapped(slot) => {
                    self.swap.free(slot);
                    slots += 1;
                }
                Origin::FileBacked(_) => {}
            }
        }

        // 仍在途的帧
        let leftover: Vec<FrameId> = inner
            .clock
            .iter()
            .filter(|&id| Arc::ptr_eq(&inner.entry(id).owner, space))
            .collect();
        for id in leftover {
            inner.free(id);
            frames += 1;
        }
        (frames, slots)
    }

    /// 帧当前的所有者与承载的页
    pub fn frame_owner(&self, id: FrameId) -> Option<(Pid, Option<Vpn>)> {
        let inner = self.inner.lock();
        inner
            .frames
            .get(id.0)
            .and_then(|e| e.as_ref())
            .map(|e| (e.owner.pid(), e.vpn))
    }

    /// 某进程的全部活跃帧
    pub fn frames_of(&self, space: &Arc<AddressSpace>) -> Vec<(FrameId, Option<Vpn>)> {
        let inner = self.inner.lock();
        inner
            .clock
            .iter()
            .filter_map(|id| {
                let entry = inner.entry(id);
                Arc::ptr_eq(&entry.owner, space).then_some((id, entry.vpn))
            })
            .collect()
    }

    /// 总的物理帧数
    pub fn total_frames(&self) -> usize {
        self.inner.lock().allocator.total_frames()
    }

    /// 活跃帧数
    pub fn live_frames(&self) -> usize {
        self.inner.lock().clock.len()
    }

    /// 空闲的帧数
    pub fn free_frames(&self) -> usize {
        self.inner.lock().allocator.free_frames()
    }

    /// 累计驱逐次数
    pub fn evictions(&self) -> usize {
        self.evictions.load(Ordering::Relaxed)
    }

    /// 获取帧池的当前状态
    /// # 返回值
    /// - 总帧数
    /// - 活跃帧数
    /// - 空闲帧数
    pub fn get_stats(&self) -> (usize, usize, usize) {
        let inner = self.inner.lock();
        (
            inner.allocator.total_frames(),
            inner.clock.len(),
            inner.allocator.free_frames(),
        )
    }
}
