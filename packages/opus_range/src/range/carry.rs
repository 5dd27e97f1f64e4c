use super::EC_SYM_MAX;

/// Deferred-carry shift register of the range encoder (RFC 6716 Section 5.1.1.2).
///
/// A symbol leaving the top of the encoder's low register may still be
/// incremented by a later carry, and so may every `0xFF` symbol emitted after
/// it. The register therefore holds back the last settled symbol plus a run
/// of `0xFF` symbols until a symbol arrives that is not `0xFF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Carry {
    /// Nothing emitted yet.
    #[default]
    Unset,
    /// `0xFF` symbols emitted before any other symbol.
    LeadingRun(u32),
    Pending(u8),
    PendingWithRun(u8, u32),
}

/// Bytes released by the carry register, in stream order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settled {
    byte: Option<u8>,
    run_byte: u8,
    run: u32,
}

impl Settled {
    pub fn bytes(self) -> impl Iterator<Item = u8> {
        self.byte
            .into_iter()
            .chain(std::iter::repeat_n(self.run_byte, self.run as usize))
    }
}

impl Carry {
    /// Feeds one output symbol into the register.
    ///
    /// `symbol` is the 9-bit value taken from the top of the low register:
    /// bit 8 is the carry into the bytes still held back, bits 0-7 are the
    /// new symbol. Returns the new register state and, once the held-back
    /// bytes are resolved, the bytes to write.
    #[must_use]
    pub fn push(self, symbol: u32) -> (Self, Option<Settled>) {
        if symbol == EC_SYM_MAX {
            let next = match self {
                Self::Unset => Self::LeadingRun(1),
                Self::LeadingRun(run) => Self::LeadingRun(run + 1),
                Self::Pending(byte) => Self::PendingWithRun(byte, 1),
                Self::PendingWithRun(byte, run) => Self::PendingWithRun(byte, run + 1),
            };
            return (next, None);
        }

        let carry = symbol >> 8;
        let (byte, run) = match self {
            Self::Unset => (None, 0),
            Self::LeadingRun(run) => (None, run),
            Self::Pending(byte) => (Some(byte), 0),
            Self::PendingWithRun(byte, run) => (Some(byte), run),
        };

        #[allow(clippy::cast_possible_truncation)]
        let settled = Settled {
            byte: byte.map(|byte| (u32::from(byte) + carry) as u8),
            run_byte: ((EC_SYM_MAX + carry) & EC_SYM_MAX) as u8,
            run,
        };

        #[allow(clippy::cast_possible_truncation)]
        let next = Self::Pending((symbol & EC_SYM_MAX) as u8);

        let settled = (settled.byte.is_some() || settled.run > 0).then_some(settled);

        (next, settled)
    }

    /// Returns the byte waiting for a possible carry, if any.
    #[must_use]
    pub const fn pending(self) -> Option<u8> {
        match self {
            Self::Pending(byte) | Self::PendingWithRun(byte, _) => Some(byte),
            Self::Unset | Self::LeadingRun(_) => None,
        }
    }

    /// Replaces the byte waiting for a possible carry.
    #[must_use]
    pub const fn with_pending(self, byte: u8) -> Self {
        match self {
            Self::Pending(_) => Self::Pending(byte),
            Self::PendingWithRun(_, run) => Self::PendingWithRun(byte, run),
            Self::Unset | Self::LeadingRun(_) => self,
        }
    }

    #[must_use]
    pub const fn is_unset(self) -> bool {
        matches!(self, Self::Unset)
    }
}
