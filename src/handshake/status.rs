// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use bitflags::bitflags;

bitflags! {
    /// Bit-packed status word published at offset 0 of every block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatusBits: u16 {
        /// Idle, acknowledged and free of alarms: a command may be written.
        const READY = 1 << 0;
        /// A command has been latched and the device call is in flight.
        const RUNNING = 1 << 1;
        /// A fault is latched until command 48 is written.
        const ALARM = 1 << 2;
        /// The device completed its initial handshake.
        const INITIALIZED = 1 << 3;
        /// The last command completed successfully and awaits acknowledge.
        const DONE = 1 << 4;
    }
}

impl StatusBits {
    /// Decode a status word read from the register file, keeping only the
    /// known bits.
    pub fn from_word(word: u16) -> Self {
        Self::from_bits_truncate(word)
    }

    pub fn word(&self) -> u16 {
        self.bits()
    }
}

impl std::fmt::Display for StatusBits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        if names.is_empty() {
            write!(f, "-")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_positions() {
        assert_eq!((StatusBits::READY | StatusBits::INITIALIZED).word(), 0b1001);
        assert_eq!((StatusBits::RUNNING | StatusBits::INITIALIZED).word(), 0b1010);
        assert_eq!((StatusBits::ALARM | StatusBits::INITIALIZED).word(), 0b1100);
        assert_eq!(StatusBits::DONE.word(), 0b1_0000);
    }

    #[test]
    fn test_unknown_bits_are_dropped() {
        assert_eq!(StatusBits::from_word(0x8009), StatusBits::READY | StatusBits::INITIALIZED);
    }

    #[test]
    fn test_display() {
        assert_eq!(StatusBits::empty().to_string(), "-");
        assert_eq!(
            (StatusBits::READY | StatusBits::INITIALIZED).to_string(),
            "READY|INITIALIZED"
        );
    }
}
