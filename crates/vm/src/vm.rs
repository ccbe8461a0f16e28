//! 组合根
//!
//! [`Vm`] 持有帧池、交换区和所有进程的地址空间，是加载器、mmap 系统调用、
//! 进程退出和陷入路径进入本子系统的入口。内核启动时创建一个实例并通过
//! [`init`] 注册为全局实例。

use crate::address::{Address, Paddr, PageNum, Vaddr, Vpn};
use crate::block::BlockDevice;
use crate::config::{VmConfig, PAGE_SIZE};
use crate::error::{FaultError, VmError, VmResult};
use crate::fault::{self, FaultInfo, FaultKind};
use crate::file::MmInode;
use crate::frame::FramePool;
use crate::page::{Backing, Origin};
use crate::page_dir::PageDirectory;
use crate::process::{Pid, ProcessOps};
use crate::space::{AddressSpace, MapId};
use crate::swap::SwapStore;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};
use lazy_static::lazy_static;
use sync::SpinLock;

/// 分页子系统统计信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmStats {
    /// 总物理帧数
    pub total_frames: usize,
    /// 活跃帧数
    pub live_frames: usize,
    /// 空闲帧数
    pub free_frames: usize,
    /// 交换槽总数
    pub swap_slots: usize,
    /// 已占用交换槽数
    pub swap_used: usize,
    /// 累计缺页次数
    pub faults: usize,
    /// 累计驱逐次数
    pub evictions: usize,
}

/// 分页子系统
pub struct Vm {
    config: VmConfig,
    pool: FramePool,
    swap: Arc<SwapStore>,
    process_ops: Arc<dyn ProcessOps>,
    spaces: SpinLock<BTreeMap<Pid, Arc<AddressSpace>>>,
    faults: AtomicUsize,
}

impl Vm {
    /// 创建分页子系统
    ///
    /// # 参数
    ///
    /// * `phys_start` / `phys_end` - 可用作用户帧的物理内存范围
    /// * `swap_device` - 交换设备，块大小必须为 512 字节
    /// * `process_ops` - 进程管理回调
    pub fn new(
        config: VmConfig,
        phys_start: Paddr,
        phys_end: Paddr,
        swap_device: Arc<dyn BlockDevice>,
        process_ops: Arc<dyn ProcessOps>,
    ) -> VmResult<Self> {
        let swap = Arc::new(SwapStore::new(swap_device)?);
        let pool = FramePool::new(phys_start, phys_end, swap.clone());
        log::info!(
            "vm: {} frames, {} swap slots, user space {:#x}..{:#x}",
            pool.total_frames(),
            swap.total_slots(),
            config.user_base,
            config.user_top
        );
        Ok(Self {
            config,
            pool,
            swap,
            process_ops,
            spaces: SpinLock::new(BTreeMap::new()),
            faults: AtomicUsize::new(0),
        })
    }

    /// 地址布局
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// 帧池
    pub fn pool(&self) -> &FramePool {
        &self.pool
    }

    /// 交换区
    pub fn swap(&self) -> &SwapStore {
        &self.swap
    }

    /// 为进程创建地址空间
    pub fn create_space(
        &self,
        pid: Pid,
        page_dir: Arc<dyn PageDirectory>,
    ) -> VmResult<Arc<AddressSpace>> {
        let mut spaces = self.spaces.lock();
        if spaces.contains_key(&pid) {
            return Err(VmError::InvalidArgument);
        }
        let space = Arc::new(AddressSpace::new(pid, self.config, page_dir));
        spaces.insert(pid, space.clone());
        Ok(space)
    }

    /// 查找进程的地址空间
    pub fn space(&self, pid: Pid) -> Option<Arc<AddressSpace>> {
        self.spaces.lock().get(&pid).cloned()
    }

    /// 建立初始用户栈：在用户空间顶端之下立即安装一个清零的可写页
    ///
    /// 返回初始栈指针。失败属于进程启动失败。
    pub fn setup_stack(&self, space: &Arc<AddressSpace>) -> VmResult<Vaddr> {
        let top = Vaddr(self.config.user_top);
        let vpn = Vpn::from_addr_floor(Vaddr(self.config.user_top - 1));
        let frame = self.pool.allocate(space, true).inspect_err(|err| {
            log::error!("pid {}: no frame for initial stack: {:?}", space.pid(), err);
        })?;
        if let Err(err) = self.pool.install(frame, space, vpn, true, Backing::Anonymous) {
            self.pool.release(frame);
            log::error!("pid {}: failed to install initial stack: {:?}", space.pid(), err);
            return Err(err);
        }
        Ok(top)
    }

    /// 将整个文件映射到 `addr`
    pub fn mmap(
        &self,
        space: &Arc<AddressSpace>,
        file: Arc<dyn MmInode>,
        addr: Vaddr,
    ) -> VmResult<MapId> {
        space.map_file(file, addr)
    }

    /// 解除映射
    ///
    /// 脏的驻留页先写回文件（只写文件范围内的字节），然后释放帧和表项。
    /// 某页写回失败时继续处理其余页，返回第一个错误。
    pub fn munmap(&self, space: &Arc<AddressSpace>, id: MapId) -> VmResult<()> {
        let region = space.take_mapping(id).ok_or(VmError::NotMapped)?;
        let mut result = Ok(());
        for vpn in region.range {
            match self.pool.release_page(space, vpn, true) {
                Ok(()) | Err(VmError::NotMapped) => {}
                Err(err) => {
                    log::warn!("pid {}: write-back of {:?} failed: {:?}", space.pid(), vpn, err);
                    if result.is_ok() {
                        result = Err(err);
                    }
                }
            }
        }
        log::debug!("pid {}: munmap {:?}", space.pid(), id);
        result
    }

    /// 进程退出：解除所有映射（写回脏页），回收全部帧和交换槽
    pub fn exit_space(&self, space: &Arc<AddressSpace>) {
        for id in space.map_ids() {
            // 写回失败已记录，退出流程继续
            let _ = self.munmap(space, id);
        }
        let (frames, slots) = self.pool.reclaim_space(space);
        self.spaces.lock().remove(&space.pid());
        log::debug!(
            "pid {}: exited, released {} frames and {} swap slots",
            space.pid(),
            frames,
            slots
        );
    }

    /// 处理 `space` 中的一次缺页，不终止进程
    ///
    /// 内核态缺页（`info.user_sp` 为 None）使用进程保存的用户栈指针判断栈增长。
    pub fn handle_page_fault(
        &self,
        space: &Arc<AddressSpace>,
        info: &FaultInfo,
    ) -> Result<FaultKind, FaultError> {
        self.faults.fetch_add(1, Ordering::Relaxed);
        let sp = info
            .user_sp
            .or_else(|| self.process_ops.saved_user_sp(space.pid()));
        let tid = self.process_ops.current_tid();
        fault::resolve(&self.pool, space, info, sp, tid)
    }

    /// 陷入路径入口：在当前进程中处理缺页，失败时终止当前进程
    pub fn page_fault(&self, info: &FaultInfo) -> bool {
        let pid = self.process_ops.current_pid();
        let Some(space) = self.space(pid) else {
            log::warn!("pid {}: page fault at {:#x} without address space", pid, info.addr);
            self.process_ops.terminate(pid, -1);
            return false;
        };
        match self.handle_page_fault(&space, info) {
            Ok(_) => true,
            Err(err) => {
                log::warn!(
                    "pid {}: killed by page fault at {:#x} ({:?}): {:?}",
                    pid,
                    info.addr,
                    info.flags,
                    err
                );
                self.process_ops.terminate(pid, err.exit_status());
                false
            }
        }
    }

    /// 从用户空间复制数据（系统调用使用）
    ///
    /// 页未驻留或没有表项时按内核态缺页处理（可能增长栈），然后重试该页。
    pub fn copy_from_user(&self, space: &Arc<AddressSpace>, va: Vaddr, buf: &mut [u8]) -> VmResult<()> {
        let mut done = 0;
        while done < buf.len() {
            let cur = va.checked_add(done).ok_or(VmError::InvalidAddress)?;
            let take = (buf.len() - done).min(PAGE_SIZE - cur.page_offset());
            match space.read_bytes_at(cur, &mut buf[done..done + take]) {
                Ok(()) => done += take,
                Err(VmError::NotMapped | VmError::InvalidAddress) => {
                    self.fault_in(space, cur, false)?
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// 向用户空间复制数据（系统调用使用），必要时按内核态缺页调入
    pub fn copy_to_user(&self, space: &Arc<AddressSpace>, va: Vaddr, data: &[u8]) -> VmResult<()> {
        let mut done = 0;
        while done < data.len() {
            let cur = va.checked_add(done).ok_or(VmError::InvalidAddress)?;
            let take = (data.len() - done).min(PAGE_SIZE - cur.page_offset());
            match space.write_bytes_at(cur, &data[done..done + take]) {
                Ok(()) => done += take,
                Err(VmError::NotMapped | VmError::InvalidAddress) => {
                    self.fault_in(space, cur, true)?
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn fault_in(&self, space: &Arc<AddressSpace>, addr: Vaddr, write: bool) -> VmResult<()> {
        match self.handle_page_fault(space, &FaultInfo::kernel(addr, write)) {
            Ok(_) => Ok(()),
            Err(FaultError::Resource(err)) => Err(err),
            Err(_) => Err(VmError::InvalidAddress),
        }
    }

    /// 获取当前统计信息
    pub fn stats(&self) -> VmStats {
        let (total_frames, live_frames, free_frames) = self.pool.get_stats();
        VmStats {
            total_frames,
            live_frames,
            free_frames,
            swap_slots: self.swap.total_slots(),
            swap_used: self.swap.used_slots(),
            faults: self.faults.load(Ordering::Relaxed),
            evictions: self.pool.evictions(),
        }
    }

    /// 某进程的页驻留情况：(驻留页, 换出页, 未加载文件页)
    pub fn residency(&self, space: &AddressSpace) -> (usize, usize, usize) {
        let spt = space.spt();
        spt.iter().fold((0, 0, 0), |(r, s, f), e| match e.origin {
            Origin::Resident { .. } => (r + 1, s, f),
            Origin::Swapped(_) => (r, s + 1, f),
            Origin::FileBacked(_) => (r, s, f + 1),
        })
    }
}

lazy_static! {
    /// 全局分页子系统实例
    static ref VM: SpinLock<Option<Arc<Vm>>> = SpinLock::new(None);
}

/// 注册全局实例
pub fn init(vm: Arc<Vm>) {
    *VM.lock() = Some(vm);
}

/// 获取全局实例
///
/// # Panics
/// 如果尚未调用 [`init`]，则 panic
pub fn vm() -> Arc<Vm> {
    match VM.lock().as_ref() {
        Some(vm) => vm.clone(),
        None => panic!("vm: not initialized"),
    }
}
