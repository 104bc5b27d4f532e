/// Stable error numbers returned by hypercalls, negated.
///
/// The values follow the errno numbers the root-cell driver already speaks,
/// so a failed hypercall can be handed back to user space unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum HvError {
    /// Caller is not allowed to perform the operation, or a cell refused
    /// its shutdown handshake
    Perm = 1,
    /// No cell with the given id
    NoEnt = 2,
    /// Configuration descriptor exceeds the temporary mapping window
    TooBig = 7,
    /// Page pool exhausted
    NoMem = 12,
    /// A CPU is already assigned elsewhere
    Busy = 16,
    /// A cell with the same name already exists
    Exists = 17,
    /// Malformed argument, descriptor or target
    Inval = 22,
    /// Unknown hypercall code
    NoSys = 38,
}

impl HvError {
    /// Gives a string description of the error
    pub fn as_str(&self) -> &'static str {
        use HvError::*;
        match *self {
            Perm => "Operation Not Permitted",
            NoEnt => "No Such Cell",
            TooBig => "Configuration Too Large",
            NoMem => "Out of Pool Pages",
            Busy => "CPU Busy",
            Exists => "Cell Already Exists",
            Inval => "Invalid Argument",
            NoSys => "Unknown Hypercall",
        }
    }

    /// The negative return value carried over the hypercall ABI.
    #[inline(always)]
    pub const fn as_retval(self) -> i64 {
        -(self as i64)
    }
}

impl TryFrom<i32> for HvError {
    type Error = ();

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        use HvError::*;
        Ok(match value {
            1 => Perm,
            2 => NoEnt,
            7 => TooBig,
            12 => NoMem,
            16 => Busy,
            17 => Exists,
            22 => Inval,
            38 => NoSys,
            _ => return Err(()),
        })
    }
}

impl core::fmt::Display for HvError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Folds a hypercall result into the signed return word: a non-negative
/// payload on success, a negated [`HvError`] on failure.
#[inline(always)]
pub fn into_retval(result: Result<i64, HvError>) -> i64 {
    match result {
        Ok(value) => value,
        Err(err) => err.as_retval(),
    }
}
