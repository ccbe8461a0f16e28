// Fault resolution through a live `Vm`: classification, termination,
// kernel-mode faults and recovery from failed fills.

use super::*;
use crate::{FaultFlags, Origin, VmError};

fn below_top(h: &Harness, pages: usize) -> Vaddr {
    Vaddr(h.vm.config().user_top - pages * PAGE_SIZE)
}

#[test]
fn test_each_origin_resolves_by_its_own_path() {
    let h = Harness::new(2, 8);
    let mut p = h.spawn_bare(1);
    let file = patterned_file(PAGE_SIZE);
    p.space
        .load_segment(file, 0, code_page(0), PAGE_SIZE, 0, true)
        .unwrap();

    assert!(matches!(
        h.fault(&p, code_page(0), false),
        Ok(FaultKind::LoadFile(_))
    ));
    p.sp = below_top(&h, 1);
    assert!(matches!(h.fault(&p, p.sp, true), Ok(FaultKind::StackGrowth)));

    h.write(&p, code_page(0), b"anon now").unwrap();
    h.clear_accessed(&p);
    p.pd.set_accessed(Vpn::from_addr_floor(p.sp).0, true);
    let report = h.vm.pool().evict_one().unwrap();
    assert_eq!(report.vpn, Vpn::from_addr_floor(code_page(0)));

    assert!(matches!(
        h.fault(&p, code_page(0) + 3, false),
        Ok(FaultKind::LoadSwap(_))
    ));
    assert_eq!(h.read(&p, code_page(0), 8).unwrap(), b"anon now");
    assert_eq!(h.vm.stats().faults, 3);
    h.assert_consistent(&[&p]);
}

#[test]
fn test_invalid_accesses_are_rejected() {
    let h = Harness::new(2, 8);
    let p = h.spawn(1);
    p.space
        .load_segment(patterned_file(PAGE_SIZE), 0, code_page(0), PAGE_SIZE, 0, false)
        .unwrap();

    assert_eq!(
        h.fault(&p, Vaddr(0), false).unwrap_err(),
        FaultError::BadAddress
    );
    assert_eq!(
        h.fault(&p, Vaddr(h.vm.config().user_top), false).unwrap_err(),
        FaultError::BadAddress
    );
    // 段和栈之间没有表项的地址
    assert_eq!(
        h.fault(&p, mmap_page(0), false).unwrap_err(),
        FaultError::InvalidReference
    );
    assert_eq!(
        h.fault(&p, code_page(0), true).unwrap_err(),
        FaultError::WriteToReadOnly
    );

    // 驻留页上的权限违例
    let stack = below_top(&h, 1);
    let mut info = FaultInfo::user(stack, true, p.sp);
    info.flags |= FaultFlags::PROTECTION;
    assert_eq!(
        h.vm.handle_page_fault(&p.space, &info).unwrap_err(),
        FaultError::InvalidReference
    );
    assert!(p.pd.get(Vpn::from_addr_floor(stack).0).is_some());
    // 没有任何帧因失败的缺页而泄漏
    assert_eq!(h.vm.stats().live_frames, 1);
    h.assert_consistent(&[&p]);
}

#[test]
fn test_nested_fault_on_same_page() {
    let h = Harness::new(2, 8);
    let p = h.spawn(1);
    let addr = below_top(&h, 2);
    let vpn = Vpn::from_addr_floor(addr);

    let guard = p.space.begin_fault(vpn, h.procs.current_tid()).unwrap();
    assert_eq!(
        h.fault(&p, addr, true).unwrap_err(),
        FaultError::NestedFault
    );
    // 其他页不受影响
    assert!(h.fault(&p, below_top(&h, 3), true).is_ok());
    drop(guard);

    assert!(matches!(h.fault(&p, addr, true), Ok(FaultKind::StackGrowth)));
    h.assert_consistent(&[&p]);
}

#[test]
fn test_kernel_fault_uses_saved_stack_pointer() {
    let h = Harness::new(4, 8);
    let p = h.spawn(1);

    // 系统调用向栈下方几页写入：按保存的用户栈指针判断
    let near = below_top(&h, 3);
    h.vm.copy_to_user(&p.space, near, b"syscall").unwrap();
    let mut buf = [0u8; 7];
    h.vm.copy_from_user(&p.space, near, &mut buf).unwrap();
    assert_eq!(&buf, b"syscall");

    let far = below_top(&h, 100);
    assert_eq!(
        h.vm.copy_to_user(&p.space, far, b"x").unwrap_err(),
        VmError::InvalidAddress
    );

    // 栈指针下移后同一地址合法
    h.procs.set_saved_sp(1, far.0 + 64);
    h.vm.copy_to_user(&p.space, far, b"x").unwrap();

    // 没有保存栈指针的进程不能增长栈
    let q = h.spawn_bare(2);
    assert_eq!(
        h.vm.copy_to_user(&q.space, below_top(&h, 1), b"x").unwrap_err(),
        VmError::InvalidAddress
    );
    h.assert_consistent(&[&p, &q]);
}

#[test]
fn test_copy_spanning_pages_faults_each_in() {
    let h = Harness::new(4, 8);
    let p = h.spawn(1);
    let data = patterned(PAGE_SIZE + 200);
    let start = below_top(&h, 3) + (PAGE_SIZE - 100);

    h.vm.copy_to_user(&p.space, start, &data).unwrap();
    let mut back = vec![0u8; data.len()];
    h.vm.copy_from_user(&p.space, start, &mut back).unwrap();
    assert_eq!(back, data);
    assert_eq!(h.vm.residency(&p.space), (3, 0, 0));
}

#[test]
fn test_failed_file_read_terminates_without_leak() {
    let h = Harness::new(4, 8);
    let p = h.spawn(1);
    h.procs.set_current(1);
    let file = patterned_file(PAGE_SIZE);
    p.space
        .load_segment(file.clone(), 0, code_page(0), PAGE_SIZE, 0, false)
        .unwrap();
    file.set_failing(true);

    assert!(!h.vm.page_fault(&FaultInfo::user(code_page(0), false, p.sp)));
    assert_eq!(h.procs.exit_status(1), Some(-1));
    assert_eq!(h.vm.stats().live_frames, 1);
    h.assert_consistent(&[&p]);

    // 恢复后同一页可以正常加载
    file.set_failing(false);
    assert_eq!(h.read(&p, code_page(0), 4).unwrap(), patterned(4));
}

#[test]
fn test_short_read_is_an_io_error() {
    let h = Harness::new(4, 8);
    let p = h.spawn(1);
    // 段声称有一整页文件内容，但文件只有 100 字节
    p.space
        .load_segment(patterned_file(100), 0, code_page(0), PAGE_SIZE, 0, false)
        .unwrap();

    assert_eq!(
        h.fault(&p, code_page(0), false).unwrap_err(),
        FaultError::Resource(VmError::Io)
    );
    assert_eq!(h.vm.stats().live_frames, 1);
    assert!(matches!(
        p.space.spt().lookup(code_page(0)).unwrap().origin,
        Origin::FileBacked(_)
    ));
}

#[test]
fn test_map_failure_releases_frame() {
    let h = Harness::new(2, 8);
    let mut p = h.spawn_bare(1);
    p.sp = below_top(&h, 1);
    h.write(&p, p.sp, b"keep").unwrap();
    h.clear_accessed(&p);
    h.vm.pool().evict_one().unwrap();
    assert_eq!(h.vm.stats().swap_used, 1);

    p.pd.set_fail_map(true);
    assert_eq!(
        h.fault(&p, below_top(&h, 2), true).unwrap_err(),
        FaultError::Resource(VmError::OutOfMemory)
    );
    // 换入后安装失败：槽已释放，表项随之删除
    assert_eq!(
        h.fault(&p, p.sp, false).unwrap_err(),
        FaultError::Resource(VmError::OutOfMemory)
    );
    p.pd.set_fail_map(false);

    let stats = h.vm.stats();
    assert_eq!((stats.live_frames, stats.swap_used), (0, 0));
    assert!(p.space.spt().is_empty());
    h.assert_consistent(&[&p]);
}

#[test]
fn test_global_entry_point() {
    let h = Harness::new(4, 8);
    let p = h.spawn(3);
    h.procs.set_current(3);
    crate::init(h.vm.clone());
    assert!(Arc::ptr_eq(&crate::vm(), &h.vm));

    let addr = below_top(&h, 2);
    assert!(crate::handle_page_fault(FaultInfo::user(addr, true, p.sp)));
    assert!(p.pd.get(Vpn::from_addr_floor(addr).0).is_some());

    assert!(!crate::handle_page_fault(FaultInfo::user(Vaddr(0), false, p.sp)));
    assert_eq!(h.procs.exit_status(3), Some(-1));
}
