//! Decoder for the A32 "load/store word and unsigned byte" family.
//!
//! The core only ever needs to replay narrow loads and stores raised by
//! trapped MMIO accesses, so the decoder classifies exactly that family
//! and nothing else. Code that touches emulated windows is assumed, by
//! construction, to be compiled down to these encodings; any other word
//! is a hard assumption violation for the caller.

use crate::contract::AccessWidth;

/// Fixed byte length of one instruction in the target instruction set.
pub const INSTRUCTION_BYTES: u64 = 4;

/// Direction of a decoded memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessDirection {
    /// Memory-to-register transfer.
    Load,
    /// Register-to-memory transfer.
    Store,
}

/// Fully classified load/store access extracted from one instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DecodedAccess {
    /// Transfer direction.
    pub direction: AccessDirection,
    /// Access width in bytes.
    pub width: AccessWidth,
    /// Source (store) or target (load) register id.
    pub register: u8,
}

const fn bit(word: u32, index: u32) -> u32 {
    (word >> index) & 1
}

/// Family predicate: "load/store word and unsigned byte".
///
/// Bits [27:26] select the family; register-offset forms (bit 25 set)
/// additionally require bit 4 clear, which fences off the media encodings
/// that share the same top bits.
const fn ld_st_w_ub(word: u32) -> bool {
    if (word >> 26) & 0b11 != 0b01 {
        return false;
    }
    bit(word, 25) == 0 || bit(word, 4) == 0
}

/// Discriminates one member of the family by its L (bit 20) and B (bit 22)
/// flags. Encodings with W set and P clear are the translated/unprivileged
/// forms and fall outside the supported set.
const fn family_member(word: u32, load: bool, byte: bool) -> bool {
    if bit(word, 20) != load as u32 {
        return false;
    }
    if bit(word, 22) != byte as u32 {
        return false;
    }
    !(bit(word, 21) == 1 && bit(word, 24) == 0)
}

const fn register_field(word: u32) -> u8 {
    ((word >> 12) & 0xF) as u8
}

/// Classifies `word` as a narrow load or store of the supported family.
///
/// Returns the access direction, width and register id, or `None` for any
/// encoding outside the family. Callers treat `None` on a trapped access
/// as a fatal configuration assumption violation.
#[must_use]
pub const fn decode(word: u32) -> Option<DecodedAccess> {
    if !ld_st_w_ub(word) {
        return None;
    }
    let (direction, width) = if family_member(word, false, false) {
        (AccessDirection::Store, AccessWidth::Word)
    } else if family_member(word, true, false) {
        (AccessDirection::Load, AccessWidth::Word)
    } else if family_member(word, false, true) {
        (AccessDirection::Store, AccessWidth::Byte)
    } else if family_member(word, true, true) {
        (AccessDirection::Load, AccessWidth::Byte)
    } else {
        return None;
    };
    Some(DecodedAccess {
        direction,
        width,
        register: register_field(word),
    })
}
