//! Cells: isolated partitions owning disjoint CPUs and memory regions.

pub mod cpu_set;
pub mod registry;

pub use cpu_set::CpuSet;
pub use registry::CellRegistry;

use alloc::sync::Arc;
use core::ops::Deref;

use corral_abi::comm::{CellState, CommRegion};

use crate::config::CellConfig;
use crate::memory::pool::PageCharge;

pub type CellId = u32;
pub type CpuId = u32;

/// The root cell is created first and keeps the lowest ID forever.
pub const ROOT_CELL_ID: CellId = 0;

/// The page shared between the hypervisor and a cell's guest, carrying the
/// message/reply/state triple at its head.
///
/// It is handed out by reference count: the guest-facing side holds its own
/// handle and never touches hypervisor locks.
#[repr(C)]
#[derive(Debug, Default)]
pub struct CommPage {
    region: CommRegion,
}

impl CommPage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            region: CommRegion::new(),
        })
    }
}

impl Deref for CommPage {
    type Target = CommRegion;

    fn deref(&self) -> &Self::Target {
        &self.region
    }
}

/// An independent partition: a stable ID, an immutable configuration, the
/// owned CPU set and the communication page shared with its guest.
#[derive(Debug)]
pub struct Cell {
    id: CellId,
    config: CellConfig,
    cpu_set: CpuSet,
    comm_page: Arc<CommPage>,
    loadable: bool,
    /// Pages backing the cell structure and its config copy; returned to the
    /// main pool when the cell is destroyed. `None` for the statically
    /// allocated root cell.
    data_charge: Option<PageCharge>,
}

impl Cell {
    pub fn new(id: CellId, config: CellConfig, cpu_set: CpuSet, data_charge: PageCharge) -> Self {
        Self {
            id,
            config,
            cpu_set,
            comm_page: CommPage::new(),
            loadable: false,
            data_charge: Some(data_charge),
        }
    }

    /// The distinguished root cell. It reports itself running from the
    /// start; it is never managed or messaged.
    pub(crate) fn root(config: CellConfig, cpu_set: CpuSet) -> Self {
        let cell = Self {
            id: ROOT_CELL_ID,
            config,
            cpu_set,
            comm_page: CommPage::new(),
            loadable: false,
            data_charge: None,
        };
        cell.comm().set_cell_state(CellState::Running);
        cell
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    pub fn config(&self) -> &CellConfig {
        &self.config
    }

    pub fn cpu_set(&self) -> &CpuSet {
        &self.cpu_set
    }

    pub(crate) fn cpu_set_mut(&mut self) -> &mut CpuSet {
        &mut self.cpu_set
    }

    pub fn comm(&self) -> &CommPage {
        &self.comm_page
    }

    /// A guest-side handle on the communication page.
    pub fn comm_page(&self) -> Arc<CommPage> {
        Arc::clone(&self.comm_page)
    }

    pub fn owns_cpu(&self, cpu: CpuId) -> bool {
        self.cpu_set.contains(cpu)
    }

    pub fn loadable(&self) -> bool {
        self.loadable
    }

    pub(crate) fn set_loadable(&mut self, loadable: bool) {
        self.loadable = loadable;
    }

    /// Pages of the main pool backing this cell's bookkeeping.
    pub fn data_pages(&self) -> usize {
        self.data_charge.as_ref().map_or(0, PageCharge::pages)
    }
}
