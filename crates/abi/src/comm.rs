//! Layout of the communication region shared between the hypervisor and a
//! cell's guest.
//!
//! The region is written by the guest and read by the hypervisor (and vice
//! versa) with no locks. The contract is three independently-atomic 32-bit
//! words; accesses must never be coalesced or reordered across a poll
//! iteration, which is exactly what the acquire/release atomics below
//! guarantee.

use core::sync::atomic::{AtomicU32, Ordering};

/// Messages the hypervisor posts to a cell.
pub mod msg {
    pub const NONE: u32 = 0;
    /// Asks the guest to consent to being stopped
    pub const SHUTDOWN_REQUEST: u32 = 1;
    /// Broadcast after any successful cell creation or destruction
    pub const RECONFIG_COMPLETED: u32 = 2;
}

/// Replies a cell's guest writes back.
///
/// Any non-`NONE` value other than the expected approval counts as a denial;
/// guests may define their own denial codes above [`reply::RECEIVED`].
pub mod reply {
    pub const NONE: u32 = 0;
    pub const REQUEST_DENIED: u32 = 1;
    pub const REQUEST_APPROVED: u32 = 2;
    pub const RECEIVED: u32 = 3;
}

/// Guest-reported cell state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CellState {
    Running = 0,
    RunningLocked = 1,
    ShutDown = 2,
    Failed = 3,
}

impl CellState {
    // update when a new state is added
    const MAX: u32 = Self::Failed as u32;
}

impl TryFrom<u32> for CellState {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if value <= Self::MAX {
            Ok(unsafe { core::mem::transmute::<u32, CellState>(value) })
        } else {
            Err(())
        }
    }
}

/// The message/reply/state triple at the head of a cell's communication page.
#[repr(C)]
#[derive(Debug)]
pub struct CommRegion {
    msg_to_cell: AtomicU32,
    reply_from_cell: AtomicU32,
    cell_state: AtomicU32,
}

impl CommRegion {
    pub const fn new() -> Self {
        Self {
            msg_to_cell: AtomicU32::new(msg::NONE),
            reply_from_cell: AtomicU32::new(reply::NONE),
            cell_state: AtomicU32::new(CellState::ShutDown as u32),
        }
    }

    /// Posts a message to the cell and clears any stale reply.
    pub fn post_message(&self, message: u32) {
        self.reply_from_cell.store(reply::NONE, Ordering::Release);
        self.msg_to_cell.store(message, Ordering::Release);
    }

    pub fn clear_message(&self) {
        self.msg_to_cell.store(msg::NONE, Ordering::Release);
    }

    pub fn msg_to_cell(&self) -> u32 {
        self.msg_to_cell.load(Ordering::Acquire)
    }

    pub fn reply_from_cell(&self) -> u32 {
        self.reply_from_cell.load(Ordering::Acquire)
    }

    /// Guest-side: answer the pending message.
    pub fn set_reply(&self, reply: u32) {
        self.reply_from_cell.store(reply, Ordering::Release);
    }

    /// The raw guest-reported state word, which may hold any value.
    pub fn cell_state_raw(&self) -> u32 {
        self.cell_state.load(Ordering::Acquire)
    }

    pub fn set_cell_state(&self, state: CellState) {
        self.cell_state.store(state as u32, Ordering::Release);
    }

    /// Guest-side: report an arbitrary state word.
    pub fn set_cell_state_raw(&self, state: u32) {
        self.cell_state.store(state, Ordering::Release);
    }
}

impl Default for CommRegion {
    fn default() -> Self {
        Self::new()
    }
}
