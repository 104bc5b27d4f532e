use corral_abi::config::NAME_LEN;

/// A cell name, bounded by the wire descriptor's NUL-padded name field.
pub type Name = heapless::String<NAME_LEN>;
