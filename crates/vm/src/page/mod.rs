//! 补充页表
//!
//! 每个进程一张，以虚拟页号为键，记录如何（重新）构造该页：
//! 驻留在某个物理帧、从文件某偏移读取，或从交换槽读回。
//! 页目录只描述"现在映射到哪"，补充页表才是页内容来源的权威记录。
//!
//! 表本身不加锁，由所属的 [`AddressSpace`](crate::AddressSpace) 用自旋锁保护。

use crate::address::{PageNum, Vaddr, Vpn};
use crate::error::{VmError, VmResult};
use crate::file::MmInode;
use crate::frame::FrameId;
use crate::swap::SwapSlot;
use alloc::sync::Arc;
use hashbrown::HashMap;

/// 文件中的一段页内容
#[derive(Clone)]
pub struct FileRange {
    /// 文件对象
    pub file: Arc<dyn MmInode>,
    /// 文件偏移量（字节）
    pub offset: usize,
    /// 从文件读取的字节数，页内其余部分填零
    pub read_bytes: usize,
    /// 脏页驱逐或解除映射时是否写回文件（mmap 为 true，可执行段为 false）
    pub write_back: bool,
}

// 手动实现 Debug，因为 dyn MmInode 没有实现 Debug
impl core::fmt::Debug for FileRange {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileRange")
            .field("file", &"<dyn MmInode>")
            .field("offset", &self.offset)
            .field("read_bytes", &self.read_bytes)
            .field("write_back", &self.write_back)
            .finish()
    }
}

impl FileRange {
    /// 将文件内容读入一页，页内剩余部分填零
    ///
    /// 读取出错或读到的字节数不足都返回 [`VmError::Io`]。
    pub fn read_into(&self, page: &mut [u8]) -> VmResult<()> {
        debug_assert!(self.read_bytes <= page.len());
        let actual_read = self
            .file
            .read_at(self.offset, &mut page[..self.read_bytes])
            .map_err(|err| {
                log::warn!("file read at offset {} failed: {}", self.offset, err);
                VmError::Io
            })?;

        if actual_read < self.read_bytes {
            log::warn!(
                "Partial read at offset {}: expected {}, got {}",
                self.offset,
                self.read_bytes,
                actual_read
            );
            return Err(VmError::Io);
        }

        page[self.read_bytes..].fill(0);
        Ok(())
    }

    /// 将页的前 `read_bytes` 字节写回文件
    pub fn write_from(&self, page: &[u8]) -> VmResult<()> {
        let actual_written = self
            .file
            .write_at(self.offset, &page[..self.read_bytes])
            .map_err(|err| {
                log::error!("file write at offset {} failed: {}", self.offset, err);
                VmError::Io
            })?;

        if actual_written != self.read_bytes {
            log::error!(
                "Partial write at offset {}: expected {}, got {}",
                self.offset,
                self.read_bytes,
                actual_written
            );
            return Err(VmError::Io);
        }
        Ok(())
    }
}

/// 驻留页在被驱逐后应当如何保存
#[derive(Debug, Clone)]
pub enum Backing {
    /// 匿名页（栈、从交换区读回的页），驱逐时总是写入交换区
    Anonymous,
    /// 来自文件
    File(FileRange),
}

/// 页的来源，决定缺页时如何处理
#[derive(Debug, Clone)]
pub enum Origin {
    /// 驻留在物理帧中
    Resident {
        /// 物理帧
        frame: FrameId,
        /// 驱逐时的去向
        backing: Backing,
    },
    /// 未驻留，从文件加载
    FileBacked(FileRange),
    /// 未驻留，内容在交换槽中
    Swapped(SwapSlot),
}

impl Origin {
    /// 是否驻留
    pub fn is_resident(&self) -> bool {
        matches!(self, Origin::Resident { .. })
    }
}

/// 补充页表项
#[derive(Debug, Clone)]
pub struct PageEntry {
    /// 虚拟页号
    pub vpn: Vpn,
    /// 用户是否可写
    pub writable: bool,
    /// 页来源
    pub origin: Origin,
}

/// 补充页表
#[derive(Debug, Default)]
pub struct SupplementalPageTable {
    entries: HashMap<Vpn, PageEntry>,
}

impl SupplementalPageTable {
    /// 创建空表
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// 查找包含 `vaddr` 的页的表项
    pub fn lookup(&self, vaddr: Vaddr) -> Option<&PageEntry> {
        self.entries.get(&Vpn::from_addr_floor(vaddr))
    }

    /// 按页号查找
    pub fn get(&self, vpn: Vpn) -> Option<&PageEntry> {
        self.entries.get(&vpn)
    }

    /// 按页号查找（可变）
    pub fn get_mut(&mut self, vpn: Vpn) -> Option<&mut PageEntry> {
        self.entries.get_mut(&vpn)
    }

    /// 插入表项，替换同一页上已有的表项
    ///
    /// 返回被替换的旧表项；调用者负责释放其帧或交换槽。
    /// 只有在无法为新表项分配内存时失败。
    pub fn insert(
        &mut self,
        vaddr: Vaddr,
        writable: bool,
        origin: Origin,
    ) -> VmResult<Option<PageEntry>> {
        let vpn = Vpn::from_addr_floor(vaddr);
        if !self.entries.contains_key(&vpn) {
            self.entries
                .try_reserve(1)
                .map_err(|_| VmError::OutOfMemory)?;
        }
        Ok(self.entries.insert(
            vpn,
            PageEntry {
                vpn,
                writable,
                origin,
            },
        ))
    }

    /// 预留 `additional` 个新表项的空间
    ///
    /// 成功后，随后至多 `additional` 次新页的 [`insert`](Self::insert) 不会失败。
    pub fn reserve(&mut self, additional: usize) -> VmResult<()> {
        self.entries
            .try_reserve(additional)
            .map_err(|_| VmError::OutOfMemory)
    }

    /// 删除表项
    ///
    /// 调用者必须先释放该页的帧或交换槽。
    pub fn remove(&mut self, vaddr: Vaddr) -> Option<PageEntry> {
        self.entries.remove(&Vpn::from_addr_floor(vaddr))
    }

    /// 取出全部表项，表变为空
    pub fn drain(&mut self) -> impl Iterator<Item = PageEntry> + '_ {
        self.entries.drain().map(|(_, entry)| entry)
    }

    /// 表项数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 表是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 遍历所有表项（无序）
    pub fn iter(&self) -> impl Iterator<Item = &PageEntry> {
        self.entries.values()
    }
}
