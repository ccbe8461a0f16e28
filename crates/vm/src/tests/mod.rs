// Host tests for the paging subsystem.
//
// The collaborator traits are implemented here for the `test-support` mocks.
// Every test builds its own `Vm` over a private mock physical region, so tests
// can run in parallel; only the architecture hooks are process-wide.

use crate::address::{Address, PageNum, Paddr, Ppn, Vaddr, Vpn};
use crate::{
    AddressSpace, ArchMmOps, BlockDevice, FaultError, FaultInfo, FaultKind, MmInode,
    PageDirectory, Pid, ProcessOps, Tid, Vm, VmConfig, PAGE_SIZE,
};
use std::cell::RefCell;
use std::sync::{Arc, Once};
use std::vec;
use std::vec::Vec;
use test_support::mock::arch::MOCK_ARCH_OPS;
use test_support::mock::block::MockBlockDevice;
use test_support::mock::file::MockFile;
use test_support::mock::page_dir::MockPageDirectory;
use test_support::mock::phys::MockPhysRegion;
use test_support::mock::process::MockProcessTable;

mod fault;

// ---------------------------------------------------------------------------
// Trait impls for the mocks
// ---------------------------------------------------------------------------

struct TestArchOps;

impl sync::ArchOps for TestArchOps {
    unsafe fn read_and_disable_interrupts(&self) -> usize {
        unsafe { MOCK_ARCH_OPS.read_and_disable_interrupts() }
    }

    unsafe fn restore_interrupts(&self, flags: usize) {
        unsafe { MOCK_ARCH_OPS.restore_interrupts(flags) }
    }
}

impl ArchMmOps for TestArchOps {
    fn paddr_to_vaddr(&self, paddr: usize) -> usize {
        MOCK_ARCH_OPS.paddr_to_vaddr(paddr)
    }

    fn flush_tlb(&self, vpn: usize) {
        FLUSHED.with(|f| f.borrow_mut().push(vpn));
    }
}

std::thread_local! {
    // 本线程刷新过的页号
    static FLUSHED: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// 取出并清空本线程记录的 TLB 刷新
pub(crate) fn take_flushed() -> Vec<usize> {
    FLUSHED.with(|f| f.take())
}

static TEST_ARCH_OPS: TestArchOps = TestArchOps;
static INIT: Once = Once::new();

/// Register the interrupt and address-translation hooks once per test binary.
pub(crate) fn init_test_env() {
    INIT.call_once(|| unsafe {
        sync::register_arch_ops(&TEST_ARCH_OPS);
        crate::register_arch_ops(&TEST_ARCH_OPS);
    });
}

impl PageDirectory for MockPageDirectory {
    fn map(&self, vpn: Vpn, ppn: Ppn, writable: bool) -> bool {
        MockPageDirectory::map(self, vpn.0, ppn.0, writable)
    }

    fn unmap(&self, vpn: Vpn) {
        MockPageDirectory::unmap(self, vpn.0)
    }

    fn translate(&self, vpn: Vpn) -> Option<Ppn> {
        MockPageDirectory::translate(self, vpn.0).map(Ppn)
    }

    fn is_accessed(&self, vpn: Vpn) -> bool {
        MockPageDirectory::is_accessed(self, vpn.0)
    }

    fn set_accessed(&self, vpn: Vpn, accessed: bool) {
        MockPageDirectory::set_accessed(self, vpn.0, accessed)
    }

    fn is_dirty(&self, vpn: Vpn) -> bool {
        MockPageDirectory::is_dirty(self, vpn.0)
    }

    fn set_dirty(&self, vpn: Vpn, dirty: bool) {
        MockPageDirectory::set_dirty(self, vpn.0, dirty)
    }
}

impl MmInode for MockFile {
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize> {
        MockFile::read_at(self, offset, buf)
    }

    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, isize> {
        MockFile::write_at(self, offset, buf)
    }

    fn len(&self) -> usize {
        MockFile::len(self)
    }
}

impl BlockDevice for MockBlockDevice {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> bool {
        MockBlockDevice::read_block(self, block_id, buf)
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> bool {
        MockBlockDevice::write_block(self, block_id, buf)
    }

    fn block_size(&self) -> usize {
        MockBlockDevice::block_size(self)
    }

    fn total_blocks(&self) -> usize {
        MockBlockDevice::total_blocks(self)
    }
}

impl ProcessOps for MockProcessTable {
    fn current_pid(&self) -> Pid {
        self.current()
    }

    fn current_tid(&self) -> Tid {
        MockProcessTable::current_tid(self)
    }

    fn terminate(&self, pid: Pid, status: i32) {
        MockProcessTable::terminate(self, pid, status)
    }

    fn saved_user_sp(&self, pid: Pid) -> Option<Vaddr> {
        self.saved_sp(pid).map(Vaddr)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A `Vm` over `frames` mock physical frames and a swap disk of `slots` slots.
pub(crate) struct Harness {
    pub vm: Arc<Vm>,
    pub disk: Arc<MockBlockDevice>,
    pub procs: Arc<MockProcessTable>,
    // 物理内存必须比 vm 活得久，字段按声明顺序 drop
    _phys: MockPhysRegion,
}

/// A user process as seen by the tests.
pub(crate) struct Process {
    pub pid: Pid,
    pub space: Arc<AddressSpace>,
    pub pd: Arc<MockPageDirectory>,
    /// User stack pointer reported in user-mode faults.
    pub sp: Vaddr,
}

impl Harness {
    pub fn new(frames: usize, slots: usize) -> Self {
        Self::with_config(frames, slots, VmConfig::default())
    }

    pub fn with_config(frames: usize, slots: usize, config: VmConfig) -> Self {
        init_test_env();
        let phys = MockPhysRegion::new(frames);
        let disk = Arc::new(MockBlockDevice::new(slots * crate::SECTORS_PER_PAGE, crate::SECTOR_SIZE));
        let procs = Arc::new(MockProcessTable::new());
        let vm = Vm::new(
            config,
            Paddr(phys.start()),
            Paddr(phys.end()),
            disk.clone(),
            procs.clone(),
        )
        .expect("vm setup");
        Self {
            vm: Arc::new(vm),
            disk,
            procs,
            _phys: phys,
        }
    }

    /// Create a process with an empty address space (no stack yet).
    pub fn spawn_bare(&self, pid: Pid) -> Process {
        let pd = Arc::new(MockPageDirectory::new());
        let space = self.vm.create_space(pid, pd.clone()).expect("create space");
        Process {
            pid,
            space,
            pd,
            sp: Vaddr(self.vm.config().user_top),
        }
    }

    /// Create a process with its initial stack page installed.
    pub fn spawn(&self, pid: Pid) -> Process {
        let mut p = self.spawn_bare(pid);
        p.sp = self.vm.setup_stack(&p.space).expect("setup stack");
        self.procs.set_saved_sp(pid, p.sp.0);
        p
    }

    /// Emulate a user-mode access: retry after each fault until the MMU is happy.
    pub fn touch(&self, p: &Process, addr: Vaddr, write: bool) -> Result<(), FaultError> {
        let vpn = Vpn::from_addr_floor(addr).0;
        for _ in 0..4 {
            if p.pd.touch(vpn, write) {
                return Ok(());
            }
            self.vm
                .handle_page_fault(&p.space, &FaultInfo::user(addr, write, p.sp))?;
        }
        panic!("page {:#x} never became accessible", addr.0);
    }

    /// Emulate a single user-mode fault and return how it was resolved.
    pub fn fault(&self, p: &Process, addr: Vaddr, write: bool) -> Result<FaultKind, FaultError> {
        self.vm
            .handle_page_fault(&p.space, &FaultInfo::user(addr, write, p.sp))
    }

    /// User-mode store of `bytes` at `addr`.
    pub fn write(&self, p: &Process, addr: Vaddr, bytes: &[u8]) -> Result<(), FaultError> {
        let mut done = 0;
        while done < bytes.len() {
            let cur = addr + done;
            let take = (bytes.len() - done).min(PAGE_SIZE - cur.page_offset());
            self.touch(p, cur, true)?;
            p.space
                .write_bytes_at(cur, &bytes[done..done + take])
                .expect("page resident after touch");
            done += take;
        }
        Ok(())
    }

    /// User-mode load of `len` bytes at `addr`.
    pub fn read(&self, p: &Process, addr: Vaddr, len: usize) -> Result<Vec<u8>, FaultError> {
        let mut out = vec![0u8; len];
        let mut done = 0;
        while done < len {
            let cur = addr + done;
            let take = (len - done).min(PAGE_SIZE - cur.page_offset());
            self.touch(p, cur, false)?;
            p.space
                .read_bytes_at(cur, &mut out[done..done + take])
                .expect("page resident after touch");
            done += take;
        }
        Ok(out)
    }

    /// Clear the accessed bit of every page `p` has mapped.
    pub fn clear_accessed(&self, p: &Process) {
        for (_, vpn) in self.vm.pool().frames_of(&p.space) {
            if let Some(vpn) = vpn {
                p.pd.set_accessed(vpn.0, false);
            }
        }
    }

    /// Check the frame/PTE bijection and the swap bookkeeping for `procs`.
    pub fn assert_consistent(&self, procs: &[&Process]) {
        let stats = self.vm.stats();
        assert!(stats.live_frames <= stats.total_frames);
        assert_eq!(stats.live_frames + stats.free_frames, stats.total_frames);

        let mut resident = 0;
        let mut swapped = 0;
        for p in procs {
            let frames = self.vm.pool().frames_of(&p.space);
            let spt = p.space.spt();
            for entry in spt.iter() {
                match &entry.origin {
                    crate::Origin::Resident { frame, .. } => {
                        resident += 1;
                        let owner = self.vm.pool().frame_owner(*frame);
                        assert_eq!(owner, Some((p.pid, Some(entry.vpn))));
                        assert!(p.pd.translate(entry.vpn.0).is_some());
                        assert!(frames.iter().any(|(id, _)| id == frame));
                    }
                    crate::Origin::Swapped(slot) => {
                        swapped += 1;
                        assert!(self.vm.swap().is_occupied(*slot));
                        assert!(p.pd.get(entry.vpn.0).is_none());
                    }
                    crate::Origin::FileBacked(_) => {
                        assert!(p.pd.get(entry.vpn.0).is_none());
                    }
                }
            }
            // 每个已安装的帧都对应一个驻留表项
            for (_, vpn) in &frames {
                let vpn = vpn.expect("no frame left in flight");
                assert!(spt.get(vpn).is_some_and(|e| e.origin.is_resident()));
            }
        }
        assert_eq!(resident, stats.live_frames);
        assert_eq!(swapped, stats.swap_used);
    }
}

/// File contents where byte `i` is `(i % 251) as u8`.
pub(crate) fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// A mock file with patterned contents.
pub(crate) fn patterned_file(len: usize) -> Arc<MockFile> {
    Arc::new(MockFile::from_bytes(patterned(len)))
}

/// Page-aligned user address `n` pages above the code base.
pub(crate) fn code_page(n: usize) -> Vaddr {
    Vaddr(0x0804_8000 + n * PAGE_SIZE)
}

/// Page-aligned address in the mmap area.
pub(crate) fn mmap_page(n: usize) -> Vaddr {
    Vaddr(0x1000_0000 + n * PAGE_SIZE)
}
