pub mod pool;
pub mod region;

use core::fmt::{Debug, LowerHex};
use core::ops::{Add, AddAssign, Sub};

pub const PAGE_SIZE: usize = 4096;

/// A virtual memory address
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct VirtAddr(u64);

/// A physical memory address
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct PhysAddr(u64);

impl Debug for VirtAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "VirtAddr({self:#x})")
    }
}

impl Debug for PhysAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "PhysAddr({self:#x})")
    }
}

macro_rules! impl_addr_ty {
    ($ty: ty) => {
        impl $ty {
            #[inline(always)]
            pub const fn null() -> Self {
                Self(0)
            }

            #[inline(always)]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            #[inline(always)]
            pub const fn into_raw(self) -> u64 {
                self.0
            }

            /// Rounds down to the containing page boundary.
            #[inline(always)]
            pub const fn page_base(self) -> Self {
                Self(align_down(self.0, PAGE_SIZE as u64))
            }

            /// Byte offset within the containing page.
            #[inline(always)]
            pub const fn page_offset(self) -> usize {
                (self.0 & (PAGE_SIZE as u64 - 1)) as usize
            }

            #[inline(always)]
            pub const fn is_page_aligned(self) -> bool {
                self.0 % PAGE_SIZE as u64 == 0
            }
        }

        impl LowerHex for $ty {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                LowerHex::fmt(&self.0, f)
            }
        }

        impl From<u64> for $ty {
            #[inline(always)]
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl Add<u64> for $ty {
            type Output = $ty;
            #[inline(always)]
            fn add(self, rhs: u64) -> Self::Output {
                Self(self.0 + rhs)
            }
        }

        impl AddAssign<u64> for $ty {
            #[inline(always)]
            fn add_assign(&mut self, rhs: u64) {
                *self = *self + rhs
            }
        }

        impl Sub<$ty> for $ty {
            type Output = u64;
            #[inline(always)]
            fn sub(self, rhs: $ty) -> Self::Output {
                self.0 - rhs.0
            }
        }
    };
}

impl_addr_ty!(VirtAddr);
impl_addr_ty!(PhysAddr);

#[inline(always)]
pub const fn align_down(value: u64, align: u64) -> u64 {
    value & !(align - 1)
}

#[inline(always)]
pub const fn align_up(value: u64, align: u64) -> u64 {
    align_down(value + align - 1, align)
}

/// Number of pages needed to cover `bytes`.
#[inline(always)]
pub const fn page_count(bytes: usize) -> usize {
    bytes.div_ceil(PAGE_SIZE)
}
