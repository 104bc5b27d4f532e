//! Control-plane core of the corral static partitioning hypervisor.
//!
//! The host operating system, running inside the distinguished *root cell*,
//! issues hypercalls to carve the machine into additional isolated *cells*:
//! disjoint subsets of CPUs and physical memory regions running guest
//! software directly on the hardware. This crate owns the data model of
//! cells and their resources, the lifecycle operations (create,
//! set-loadable, start, destroy), the inter-cell messaging handshake, state
//! introspection and the orderly shutdown rendezvous.
//!
//! Architecture-specific primitives (suspending and resetting CPUs,
//! installing guest mappings, committing page-table changes) are consumed
//! through the [`arch::Arch`] trait; the core never touches hardware
//! directly.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch;
pub mod cell;
pub mod config;
pub mod control;
pub mod hypercall;
pub mod logging;
pub mod memory;
pub mod percpu;
pub mod utils;

pub use corral_abi as abi;
pub use corral_abi::errors::HvError;

pub use control::Hypervisor;

pub type HvResult<T = ()> = Result<T, HvError>;

/// Upper bound on the pages temporarily mapped to read a guest's cell
/// configuration descriptor.
pub const NUM_TEMPORARY_PAGES: usize = 16;
