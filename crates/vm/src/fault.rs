//! 缺页处理
//!
//! 陷入路径在每次缺页时调用 [`handle_page_fault`]。处理流程：
//!
//! 1. 空指针、内核空间、低于最低用户地址：终止进程
//! 2. 没有补充页表项：在栈指针下方允许的距离内、且不在保护页中则增长栈
//!    （新的清零帧），否则终止进程
//! 3. FileBacked：分配帧，读取文件范围，剩余部分填零，安装为驻留页
//! 4. Swapped：分配帧，从交换槽读回（同时释放该槽），安装为驻留页
//! 5. 驻留页上的不存在缺页：内核不变式被破坏，panic
//!
//! 帧分配可能触发驱逐，但正在缺页的页尚未驻留，不会成为受害者。
//!
//! 每次处理先认领缺页的页，再读取表项。其他线程正在处理同一页时等待，
//! 之后看到页已驻留便直接返回；同一线程重复认领视为嵌套缺页。

use crate::address::{PageNum, UsizeConvert, Vaddr, Vpn};
use crate::config::VmConfig;
use crate::error::FaultError;
use crate::frame::{frame_bytes, FramePool};
use crate::page::{Backing, FileRange, Origin, PageEntry};
use crate::process::Tid;
use crate::space::AddressSpace;
use crate::swap::SwapSlot;
use alloc::sync::Arc;
use bitflags::bitflags;

bitflags! {
    /// 缺页错误码（与 x86 页错误码的低三位一致）
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FaultFlags: u32 {
        /// 页存在，属于权限违例；未设置表示页不存在
        const PROTECTION = 1 << 0;
        /// 写访问
        const WRITE = 1 << 1;
        /// 来自用户态
        const USER = 1 << 2;
    }
}

/// 一次缺页的描述
#[derive(Debug, Clone, Copy)]
pub struct FaultInfo {
    /// 引发缺页的地址
    pub addr: Vaddr,
    /// 错误码
    pub flags: FaultFlags,
    /// 用户态缺页时陷阱帧中的栈指针；内核态缺页为 None，改用进程保存的栈指针
    pub user_sp: Option<Vaddr>,
}

impl FaultInfo {
    /// 用户态的不存在缺页
    pub fn user(addr: Vaddr, write: bool, sp: Vaddr) -> Self {
        let mut flags = FaultFlags::USER;
        flags.set(FaultFlags::WRITE, write);
        Self {
            addr,
            flags,
            user_sp: Some(sp),
        }
    }

    /// 内核态访问用户地址引发的不存在缺页（系统调用期间）
    pub fn kernel(addr: Vaddr, write: bool) -> Self {
        let mut flags = FaultFlags::empty();
        flags.set(FaultFlags::WRITE, write);
        Self {
            addr,
            flags,
            user_sp: None,
        }
    }

    /// 页是否不存在
    pub fn not_present(&self) -> bool {
        !self.flags.contains(FaultFlags::PROTECTION)
    }

    /// 是否写访问
    pub fn is_write(&self) -> bool {
        self.flags.contains(FaultFlags::WRITE)
    }

    /// 是否来自用户态
    pub fn is_user(&self) -> bool {
        self.flags.contains(FaultFlags::USER)
    }
}

/// 缺页的处理方式
#[derive(Debug, Clone)]
pub enum FaultKind {
    /// 栈增长，安装新的清零页
    StackGrowth,
    /// 从文件加载
    LoadFile(FileRange),
    /// 从交换槽读回
    LoadSwap(SwapSlot),
    /// 同一页上并发的缺页已经将其调入，无需处理
    AlreadyResident,
}

/// 判定缺页的处理方式
///
/// `entry` 是缺页地址所在页的补充页表项，`sp` 是用于栈增长判断的用户栈指针。
///
/// # Panics
/// 驻留页上发生不存在缺页时 panic
pub fn classify(
    config: &VmConfig,
    entry: Option<&PageEntry>,
    info: &FaultInfo,
    sp: Option<Vaddr>,
) -> Result<FaultKind, FaultError> {
    let addr = info.addr.as_usize();
    if info.addr.is_null() || !config.is_user_addr(addr) {
        return Err(FaultError::BadAddress);
    }

    match entry {
        Some(e) if info.is_write() && !e.writable => Err(FaultError::WriteToReadOnly),
        _ if !info.not_present() => Err(FaultError::InvalidReference),
        Some(e) => match &e.origin {
            Origin::FileBacked(range) => Ok(FaultKind::LoadFile(range.clone())),
            Origin::Swapped(slot) => Ok(FaultKind::LoadSwap(*slot)),
            Origin::Resident { frame, .. } => panic!(
                "not-present fault at {:#x} on page resident in frame {}",
                addr, frame.0
            ),
        },
        None => classify_stack_access(config, addr, sp),
    }
}

fn classify_stack_access(
    config: &VmConfig,
    addr: usize,
    sp: Option<Vaddr>,
) -> Result<FaultKind, FaultError> {
    if addr < config.stack_bottom() {
        return Err(FaultError::InvalidReference);
    }
    if addr < config.stack_limit() {
        return Err(FaultError::StackOverflow);
    }
    match sp {
        Some(sp) if addr.saturating_add(config.stack_growth_window) >= sp.as_usize() => {
            Ok(FaultKind::StackGrowth)
        }
        _ => Err(FaultError::InvalidReference),
    }
}

/// 处理 `space` 中的一次缺页
///
/// 成功时页已驻留并映射；失败时调用者负责终止进程。
/// `tid` 标识缺页的线程，用于区分嵌套缺页和并发缺页。
pub(crate) fn resolve(
    pool: &FramePool,
    space: &Arc<AddressSpace>,
    info: &FaultInfo,
    sp: Option<Vaddr>,
    tid: Tid,
) -> Result<FaultKind, FaultError> {
    let vpn = Vpn::from_addr_floor(info.addr);
    let _guard = space.begin_fault(vpn, tid)?;
    // 认领之后再读表项：同一页上并发的缺页可能已经把它调入
    let entry = space.spt().get(vpn).cloned();
    if let Some(e) = &entry {
        if e.origin.is_resident()
            && info.not_present()
            && !(info.is_write() && !e.writable)
            && space.page_dir().translate(vpn).is_some()
        {
            log::trace!("pid {}: {:?} already resident", space.pid(), vpn);
            return Ok(FaultKind::AlreadyResident);
        }
    }
    let kind = classify(space.config(), entry.as_ref(), info, sp)?;
    log::trace!(
        "pid {}: fault at {:#x} ({:?}) -> {:?}",
        space.pid(),
        info.addr,
        info.flags,
        kind
    );

    match &kind {
        FaultKind::StackGrowth => {
            let frame = pool.allocate(space, true)?;
            if let Err(err) = pool.install(frame, space, vpn, true, Backing::Anonymous) {
                pool.release(frame);
                return Err(err.into());
            }
        }
        FaultKind::LoadFile(range) => {
            let writable = entry.as_ref().is_some_and(|e| e.writable);
            let frame = pool.allocate(space, false)?;
            // SAFETY: 在途帧只被当前缺页处理访问
            let page = unsafe { frame_bytes(frame.ppn()) };
            if let Err(err) = range.read_into(page) {
                pool.release(frame);
                return Err(err.into());
            }
            let backing = Backing::File(range.clone());
            if let Err(err) = pool.install(frame, space, vpn, writable, backing) {
                pool.release(frame);
                return Err(err.into());
            }
        }
        FaultKind::LoadSwap(slot) => {
            let writable = entry.as_ref().is_some_and(|e| e.writable);
            let frame = pool.allocate(space, false)?;
            // SAFETY: 同上
            let page = unsafe { frame_bytes(frame.ppn()) };
            if let Err(err) = pool.swap().read_in(*slot, page) {
                pool.release(frame);
                return Err(err.into());
            }
            if let Err(err) = pool.install(frame, space, vpn, writable, Backing::Anonymous) {
                pool.release(frame);
                // 槽已释放，表项不能再指向它
                space.spt().remove(vpn.start_addr());
                return Err(err.into());
            }
        }
        FaultKind::AlreadyResident => {}
    }
    Ok(kind)
}

/// 陷入路径的缺页入口
///
/// 在当前进程的地址空间中处理缺页；处理失败时以 -1 终止当前进程。
/// 返回缺页是否已解决。
pub fn handle_page_fault(info: FaultInfo) -> bool {
    crate::vm::vm().page_fault(&info)
}
