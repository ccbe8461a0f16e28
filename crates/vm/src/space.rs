//! 进程地址空间
//!
//! [`AddressSpace`] 把一个进程的页目录、补充页表和文件映射列表放在一起。
//! 帧池通过 `Arc<AddressSpace>` 引用帧的所有者，驱逐时据此找到
//! 受害页所在的页目录和页表。
//!
//! 锁顺序：帧池锁 → 补充页表锁 → 交换区锁。持有补充页表锁时
//! 不会再去获取帧池锁。

use crate::address::{Address, PageNum, Ppn, UsizeConvert, Vaddr, Vpn, VpnRange};
use crate::arch_ops::arch_ops;
use crate::config::{VmConfig, PAGE_SIZE};
use crate::error::{FaultError, VmError, VmResult};
use crate::file::MmInode;
use crate::page::{FileRange, Origin, SupplementalPageTable};
use crate::page_dir::PageDirectory;
use crate::process::{Pid, Tid};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use sync::{SpinLock, SpinLockGuard};

/// 文件映射编号，在进程内唯一
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MapId(pub usize);

/// 一段文件映射
///
/// 共享同一文件的连续 FileBacked 页；解除映射时脏的驻留页写回文件。
#[derive(Clone)]
pub struct MmapRegion {
    /// 映射编号
    pub id: MapId,
    /// 映射覆盖的虚拟页
    pub range: VpnRange,
    /// 被映射的文件
    pub file: Arc<dyn MmInode>,
}

impl core::fmt::Debug for MmapRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MmapRegion")
            .field("id", &self.id)
            .field("range", &self.range)
            .field("file", &"<dyn MmInode>")
            .finish()
    }
}

/// 进程地址空间
pub struct AddressSpace {
    pid: Pid,
    config: VmConfig,
    page_dir: Arc<dyn PageDirectory>,
    spt: SpinLock<SupplementalPageTable>,
    mappings: SpinLock<BTreeMap<MapId, MmapRegion>>,
    next_map_id: AtomicUsize,
    /// 正在处理缺页的页及处理它的线程
    faulting: SpinLock<Vec<(Vpn, Tid)>>,
}

impl AddressSpace {
    /// 创建空地址空间
    pub fn new(pid: Pid, config: VmConfig, page_dir: Arc<dyn PageDirectory>) -> Self {
        Self {
            pid,
            config,
            page_dir,
            spt: SpinLock::new(SupplementalPageTable::new()),
            mappings: SpinLock::new(BTreeMap::new()),
            next_map_id: AtomicUsize::new(0),
            faulting: SpinLock::new(Vec::new()),
        }
    }

    /// 所属进程
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// 地址布局
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// 页目录
    pub fn page_dir(&self) -> &dyn PageDirectory {
        self.page_dir.as_ref()
    }

    /// 锁定补充页表
    pub fn spt(&self) -> SpinLockGuard<'_, SupplementalPageTable> {
        self.spt.lock()
    }

    /// 懒加载一个可执行段
    ///
    /// 从文件偏移 `ofs` 开始，在 `upage` 处建立 `read_bytes + zero_bytes` 字节的映射：
    /// 前 `read_bytes` 字节来自文件，其余填零。每页只记录一个 FileBacked 表项，
    /// 真正的读取推迟到第一次缺页。
    ///
    /// `upage`、`ofs` 和总长度都必须按页对齐。尚未加载的相邻段共享的页以后者为准；
    /// 已驻留或已换出的页不能被覆盖。
    pub fn load_segment(
        &self,
        file: Arc<dyn MmInode>,
        ofs: usize,
        upage: Vaddr,
        read_bytes: usize,
        zero_bytes: usize,
        writable: bool,
    ) -> VmResult<()> {
        let total = read_bytes
            .checked_add(zero_bytes)
            .ok_or(VmError::InvalidArgument)?;
        if total % PAGE_SIZE != 0 || !upage.is_page_aligned() || ofs % PAGE_SIZE != 0 {
            return Err(VmError::InvalidArgument);
        }
        ofs.checked_add(total).ok_or(VmError::InvalidArgument)?;
        let end = upage.checked_add(total).ok_or(VmError::InvalidAddress)?;
        if upage.as_usize() < self.config.user_base || end.as_usize() > self.config.user_top {
            return Err(VmError::InvalidAddress);
        }

        let pages = VpnRange::from_start_len(Vpn::from_addr_floor(upage), total / PAGE_SIZE);
        let mut spt = self.spt.lock();
        let mut fresh = 0;
        for vpn in pages.iter() {
            match spt.get(vpn).map(|e| &e.origin) {
                None => fresh += 1,
                Some(Origin::FileBacked(_)) => {}
                Some(_) => return Err(VmError::AlreadyMapped),
            }
        }
        // 先为全部新表项预留空间，之后的插入不会失败，表不会只改一半
        spt.reserve(fresh)?;

        let mut remaining = read_bytes;
        for (i, vpn) in pages.iter().enumerate() {
            let page_read = remaining.min(PAGE_SIZE);
            remaining -= page_read;
            let range = FileRange {
                file: file.clone(),
                offset: ofs + i * PAGE_SIZE,
                read_bytes: page_read,
                write_back: false,
            };
            spt.insert(vpn.start_addr(), writable, Origin::FileBacked(range))?;
        }

        log::debug!(
            "pid {}: segment {:#x}..{:#x} (file {:#x}, {} bytes), writable={}",
            self.pid,
            upage,
            end,
            ofs,
            read_bytes,
            writable
        );
        Ok(())
    }

    /// 为文件建立映射表项并登记映射区域
    ///
    /// `addr` 必须非空、按页对齐，文件不能为空；映射范围必须位于栈区以下的
    /// 用户空间，且不与任何已有页重叠。
    pub(crate) fn map_file(&self, file: Arc<dyn MmInode>, addr: Vaddr) -> VmResult<MapId> {
        let len = file.len();
        if addr.is_null() || !addr.is_page_aligned() || len == 0 {
            return Err(VmError::InvalidArgument);
        }
        let end = addr.checked_add(len).ok_or(VmError::InvalidAddress)?;
        if addr.as_usize() < self.config.user_base || end.as_usize() > self.config.stack_bottom()
        {
            return Err(VmError::InvalidAddress);
        }

        let range = VpnRange::new(Vpn::from_addr_floor(addr), Vpn::from_addr_ceil(end));
        {
            let mut spt = self.spt.lock();
            if range.iter().any(|vpn| spt.get(vpn).is_some()) {
                return Err(VmError::AlreadyMapped);
            }
            for (i, vpn) in range.iter().enumerate() {
                let offset = i * PAGE_SIZE;
                let entry = FileRange {
                    file: file.clone(),
                    offset,
                    read_bytes: (len - offset).min(PAGE_SIZE),
                    write_back: true,
                };
                if let Err(err) = spt.insert(vpn.start_addr(), true, Origin::FileBacked(entry)) {
                    // 回滚已插入的页，它们都还没有驻留
                    for inserted in range.iter().take(i) {
                        spt.remove(inserted.start_addr());
                    }
                    return Err(err);
                }
            }
        }

        let id = MapId(self.next_map_id.fetch_add(1, Ordering::Relaxed));
        self.mappings
            .lock()
            .insert(id, MmapRegion { id, range, file });
        log::debug!(
            "pid {}: mmap {:?} at {:#x}, {} pages",
            self.pid,
            id,
            addr,
            range.len()
        );
        Ok(id)
    }

    /// 取出映射区域登记
    pub(crate) fn take_mapping(&self, id: MapId) -> Option<MmapRegion> {
        self.mappings.lock().remove(&id)
    }

    /// 当前所有映射编号
    pub fn map_ids(&self) -> Vec<MapId> {
        self.mappings.lock().keys().copied().collect()
    }

    /// 查询映射区域
    pub fn mapping(&self, id: MapId) -> Option<MmapRegion> {
        self.mappings.lock().get(&id).cloned()
    }

    /// 标记某页进入缺页处理
    ///
    /// 同一线程在处理该页期间再次缺页返回 [`FaultError::NestedFault`]；
    /// 其他线程正在处理该页时等待其完成，调用者随后重新读取表项。
    pub(crate) fn begin_fault(&self, vpn: Vpn, tid: Tid) -> Result<FaultGuard<'_>, FaultError> {
        loop {
            {
                let mut faulting = self.faulting.lock();
                match faulting.iter().find(|(v, _)| *v == vpn) {
                    Some(&(_, owner)) if owner == tid => return Err(FaultError::NestedFault),
                    Some(_) => {}
                    None => {
                        faulting.push((vpn, tid));
                        return Ok(FaultGuard { space: self, vpn });
                    }
                }
            }
            core::hint::spin_loop();
        }
    }

    /// 从用户虚拟地址读取字节序列（跨页安全）
    ///
    /// 只访问已驻留的页：遇到未驻留的页返回 [`VmError::NotMapped`]，
    /// 没有表项的页返回 [`VmError::InvalidAddress`]。复制期间持有补充页表锁，
    /// 页不会被驱逐。
    pub fn read_bytes_at(&self, va: Vaddr, out: &mut [u8]) -> VmResult<()> {
        let spt = self.spt.lock();
        let mut done = 0usize;
        while done < out.len() {
            let cur = va.checked_add(done).ok_or(VmError::InvalidAddress)?;
            let (vpn, ppn) = self.resident_page(&spt, cur, false)?;
            let page_off = cur.page_offset();
            let take = (out.len() - done).min(PAGE_SIZE - page_off);

            let src = (arch_ops().paddr_to_vaddr(ppn.start_addr().as_usize()) + page_off) as *const u8;
            // SAFETY: 页驻留且补充页表锁阻止驱逐，源区域位于该帧内
            unsafe {
                core::ptr::copy_nonoverlapping(src, out[done..].as_mut_ptr(), take);
            }
            self.page_dir.set_accessed(vpn, true);
            done += take;
        }
        Ok(())
    }

    /// 向用户虚拟地址写入字节序列（跨页安全）
    ///
    /// 与 [`read_bytes_at`](Self::read_bytes_at) 规则相同，另外目标页必须可写。
    /// 写入后设置访问位和脏位，与用户态访存效果一致。
    pub fn write_bytes_at(&self, va: Vaddr, bytes: &[u8]) -> VmResult<()> {
        let spt = self.spt.lock();
        let mut written = 0usize;
        while written < bytes.len() {
            let cur = va.checked_add(written).ok_or(VmError::InvalidAddress)?;
            let (vpn, ppn) = self.resident_page(&spt, cur, true)?;
            let page_off = cur.page_offset();
            let take = (bytes.len() - written).min(PAGE_SIZE - page_off);

            let dst = (arch_ops().paddr_to_vaddr(ppn.start_addr().as_usize()) + page_off) as *mut u8;
            // SAFETY: 同 read_bytes_at
            unsafe {
                core::ptr::copy_nonoverlapping(bytes[written..].as_ptr(), dst, take);
            }
            self.page_dir.set_accessed(vpn, true);
            self.page_dir.set_dirty(vpn, true);
            written += take;
        }
        Ok(())
    }

    fn resident_page(
        &self,
        spt: &SupplementalPageTable,
        va: Vaddr,
        write: bool,
    ) -> VmResult<(Vpn, Ppn)> {
        let entry = spt.lookup(va).ok_or(VmError::InvalidAddress)?;
        if write && !entry.writable {
            return Err(VmError::InvalidAddress);
        }
        if !entry.origin.is_resident() {
            return Err(VmError::NotMapped);
        }
        let ppn = self
            .page_dir
            .translate(entry.vpn)
            .unwrap_or_else(|| panic!("pid {}: resident page {:?} not mapped", self.pid, entry.vpn));
        Ok((entry.vpn, ppn))
    }
}

/// 缺页处理期间的页标记，drop 时清除
pub(crate) struct FaultGuard<'a> {
    space: &'a AddressSpace,
    vpn: Vpn,
}

impl Drop for FaultGuard<'_> {
    fn drop(&mut self) {
        let mut faulting = self.space.faulting.lock();
        if let Some(pos) = faulting.iter().position(|&(v, _)| v == self.vpn) {
            faulting.swap_remove(pos);
        }
    }
}
