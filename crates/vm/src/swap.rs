//! 交换区
//!
//! 交换设备被划分为连续的页大小槽位：每个槽占 [`SECTORS_PER_PAGE`] 个扇区，
//! 槽 `i` 从扇区 `SECTORS_PER_PAGE * i` 开始。占用位图只在内存中维护，
//! 启动时为空。
//!
//! 一个槽只在一次驻留周期内使用：驱逐时写入，缺页时读回后立即释放。
//! 位图与设备传输由同一把锁串行化，一次扫描加一次传输在锁内完成。

use crate::block::BlockDevice;
use crate::config::{PAGE_SIZE, SECTORS_PER_PAGE, SECTOR_SIZE};
use crate::error::{VmError, VmResult};
use crate::util::bitmap::Bitmap;
use alloc::sync::Arc;
use sync::SpinLock;

/// 交换槽编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SwapSlot(pub usize);

impl SwapSlot {
    /// 槽的起始扇区
    pub fn first_sector(self) -> usize {
        self.0 * SECTORS_PER_PAGE
    }
}

/// 交换区
pub struct SwapStore {
    device: Arc<dyn BlockDevice>,
    slots: SpinLock<Bitmap>,
}

impl SwapStore {
    /// 在块设备上建立交换区
    ///
    /// 设备块大小必须等于扇区大小；不足一页的尾部扇区不使用。
    pub fn new(device: Arc<dyn BlockDevice>) -> VmResult<Self> {
        if device.block_size() != SECTOR_SIZE {
            log::error!(
                "swap: unsupported block size {} (expected {})",
                device.block_size(),
                SECTOR_SIZE
            );
            return Err(VmError::InvalidArgument);
        }
        let slot_count = device.total_blocks() / SECTORS_PER_PAGE;
        log::debug!("swap: {} slots", slot_count);
        Ok(Self {
            device,
            slots: SpinLock::new(Bitmap::new(slot_count)),
        })
    }

    /// 将一页内容写入编号最小的空闲槽
    ///
    /// 交换区已满返回 [`VmError::SwapFull`]；设备写失败返回 [`VmError::Io`]，
    /// 此时槽保持空闲。
    pub fn write_out(&self, page: &[u8]) -> VmResult<SwapSlot> {
        assert_eq!(page.len(), PAGE_SIZE, "swap: write_out expects one page");

        let mut slots = self.slots.lock();
        let Some(idx) = slots.find_first_free() else {
            log::error!("swap: out of swap slots ({} in use)", slots.used());
            return Err(VmError::SwapFull);
        };
        let slot = SwapSlot(idx);

        for (i, sector) in page.chunks_exact(SECTOR_SIZE).enumerate() {
            if !self.device.write_block(slot.first_sector() + i, sector) {
                log::error!("swap: write of slot {} failed at sector {}", idx, i);
                return Err(VmError::Io);
            }
        }

        slots.set(idx);
        log::debug!("swap: wrote slot {}", idx);
        Ok(slot)
    }

    /// 将槽内容读入 `page`，成功后释放该槽
    ///
    /// 设备读失败返回 [`VmError::Io`]，槽保持占用。
    ///
    /// # Panics
    /// 槽未被占用时 panic
    pub fn read_in(&self, slot: SwapSlot, page: &mut [u8]) -> VmResult<()> {
        assert_eq!(page.len(), PAGE_SIZE, "swap: read_in expects one page");

        let mut slots = self.slots.lock();
        assert!(
            slot.0 < slots.len() && slots.is_set(slot.0),
            "swap: read of free slot {}",
            slot.0
        );

        for (i, sector) in page.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            if !self.device.read_block(slot.first_sector() + i, sector) {
                log::error!("swap: read of slot {} failed at sector {}", slot.0, i);
                return Err(VmError::Io);
            }
        }

        slots.clear(slot.0);
        log::debug!("swap: read back slot {}", slot.0);
        Ok(())
    }

    /// 释放槽，不读取内容（其页表项被销毁时）
    pub fn free(&self, slot: SwapSlot) {
        self.slots.lock().clear(slot.0);
    }

    /// 已占用的槽数
    pub fn used_slots(&self) -> usize {
        self.slots.lock().used()
    }

    /// 槽总数
    pub fn total_slots(&self) -> usize {
        self.slots.lock().len()
    }

    /// 槽是否被占用
    pub fn is_occupied(&self, slot: SwapSlot) -> bool {
        let slots = self.slots.lock();
        slot.0 < slots.len() && slots.is_set(slot.0)
    }
}
