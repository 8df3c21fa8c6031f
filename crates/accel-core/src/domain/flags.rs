//! Capability flags carried by plugins and used as session hints.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Capability bitset.
///
/// A plugin advertises what it is (`CPU | SOFTWARE`, `REMOTE`, ...). A session
/// hint uses the same bits to say what it prefers. `NONE` as a hint means
/// "no preference".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PluginFlags(u32);

impl PluginFlags {
    pub const NONE: PluginFlags = PluginFlags(0);
    pub const CPU: PluginFlags = PluginFlags(0x1);
    pub const GPU: PluginFlags = PluginFlags(0x2);
    pub const FPGA: PluginFlags = PluginFlags(0x4);
    pub const SOFTWARE: PluginFlags = PluginFlags(0x8);
    pub const TENSORFLOW: PluginFlags = PluginFlags(0x10);
    pub const TORCH: PluginFlags = PluginFlags(0x20);
    pub const JETSON: PluginFlags = PluginFlags(0x40);
    pub const GENERIC: PluginFlags = PluginFlags(0x80);
    pub const DEBUG: PluginFlags = PluginFlags(0x100);
    pub const REMOTE: PluginFlags = PluginFlags(0x4000);
    pub const ALL: PluginFlags = PluginFlags(0xffff);

    pub const fn from_bits(bits: u32) -> Self {
        PluginFlags(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Any bit in common.
    pub const fn intersects(self, other: PluginFlags) -> bool {
        self.0 & other.0 != 0
    }

    /// All bits of `other` present.
    pub const fn contains(self, other: PluginFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn without(self, other: PluginFlags) -> Self {
        PluginFlags(self.0 & !other.0)
    }
}

impl BitOr for PluginFlags {
    type Output = PluginFlags;

    fn bitor(self, rhs: Self) -> Self {
        PluginFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for PluginFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for PluginFlags {
    type Output = PluginFlags;

    fn bitand(self, rhs: Self) -> Self {
        PluginFlags(self.0 & rhs.0)
    }
}

impl fmt::Display for PluginFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(PluginFlags, &str); 10] = [
            (PluginFlags::CPU, "cpu"),
            (PluginFlags::GPU, "gpu"),
            (PluginFlags::FPGA, "fpga"),
            (PluginFlags::SOFTWARE, "software"),
            (PluginFlags::TENSORFLOW, "tensorflow"),
            (PluginFlags::TORCH, "torch"),
            (PluginFlags::JETSON, "jetson"),
            (PluginFlags::GENERIC, "generic"),
            (PluginFlags::DEBUG, "debug"),
            (PluginFlags::REMOTE, "remote"),
        ];

        if self.is_empty() {
            return write!(f, "none");
        }
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "{:#x}", self.0)
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}
