//! 自旋锁封装
//!
//! 以 [`RawSpinLock`] 为底层锁的 `lock_api::Mutex`。

use crate::raw_spin_lock::RawSpinLock;

/// 提供对数据互斥访问的自旋锁
///
/// # 示例
/// ```ignore
/// let lock = SpinLock::new(0);
/// {
///     let mut guard = lock.lock(); // 获取锁并关中断
///     *guard += 1;
/// } // 离开作用域，自动释放锁并恢复中断状态
/// ```
///
/// # 注意
/// SpinLock 不可重入。持锁期间中断处于关闭状态，嵌套获取多把锁时
/// 必须遵守固定的加锁顺序。
pub type SpinLock<T> = lock_api::Mutex<RawSpinLock, T>;

/// SpinLock 的 RAII 保护器，离开作用域时释放锁
pub type SpinLockGuard<'a, T> = lock_api::MutexGuard<'a, RawSpinLock, T>;
