//! Pre-sized physical page pools.
//!
//! The hypervisor owns two pools, carved out at enablement: the main pool
//! backing cell bookkeeping structures and spilled CPU sets, and the remap
//! pool backing temporary guest-config mappings. A pool only accounts for
//! pages; a [`PageCharge`] returns its pages when dropped, so every
//! allocation is balanced by a free on every exit path by construction.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;

use crate::HvError;

#[derive(Debug, Clone, Copy, Error)]
#[error("page pool \"{pool}\" exhausted ({requested} pages requested)")]
pub struct PoolExhausted {
    pub pool: &'static str,
    pub requested: usize,
}

impl From<PoolExhausted> for HvError {
    fn from(_: PoolExhausted) -> Self {
        HvError::NoMem
    }
}

#[derive(Debug)]
pub struct PagePool {
    name: &'static str,
    pages: usize,
    used_pages: AtomicUsize,
}

impl PagePool {
    pub fn new(name: &'static str, pages: usize) -> Arc<Self> {
        Arc::new(Self {
            name,
            pages,
            used_pages: AtomicUsize::new(0),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn used_pages(&self) -> usize {
        self.used_pages.load(Ordering::Relaxed)
    }

    /// Reserves `pages` pages from the pool.
    pub fn alloc(self: &Arc<Self>, pages: usize) -> Result<PageCharge, PoolExhausted> {
        self.used_pages
            .fetch_update(Ordering::Acquire, Ordering::Relaxed, |used| {
                used.checked_add(pages).filter(|total| *total <= self.pages)
            })
            .map_err(|_| PoolExhausted {
                pool: self.name,
                requested: pages,
            })?;

        Ok(PageCharge {
            pool: Arc::clone(self),
            pages,
        })
    }
}

/// A live reservation against a [`PagePool`]; dropping it frees the pages.
#[derive(Debug)]
pub struct PageCharge {
    pool: Arc<PagePool>,
    pages: usize,
}

impl PageCharge {
    pub fn pages(&self) -> usize {
        self.pages
    }
}

impl Drop for PageCharge {
    fn drop(&mut self) {
        self.pool.used_pages.fetch_sub(self.pages, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charges_are_returned_on_drop() {
        let pool = PagePool::new("test", 4);

        let a = pool.alloc(3).unwrap();
        assert_eq!(pool.used_pages(), 3);

        assert!(pool.alloc(2).is_err());
        let b = pool.alloc(1).unwrap();
        assert_eq!(pool.used_pages(), 4);

        drop(a);
        assert_eq!(pool.used_pages(), 1);
        drop(b);
        assert_eq!(pool.used_pages(), 0);
    }

    #[test]
    fn exhaustion_reports_the_pool() {
        let pool = PagePool::new("mem", 1);
        let err = pool.alloc(2).unwrap_err();
        assert_eq!(err.pool, "mem");
        assert_eq!(HvError::from(err), HvError::NoMem);
    }
}
