use itertools::Itertools;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// One tier of a pool's configuration lock.
///
/// Tiers are always acquired in ascending and released in descending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    /// Pool topology and everything derived from it.
    Config = 0,
    /// Vdev state such as faulted or degraded.
    State = 1,
    /// Block allocation.
    Alloc = 2,
    /// In-flight I/O.
    Zio = 3,
    /// Deferred frees.
    Free = 4,
    /// Vdev-level bookkeeping.
    Vdev = 5,
}

impl Tier {
    /// Number of tiers.
    pub const COUNT: usize = 6;

    /// All tiers in acquisition order.
    pub const ALL: [Tier; Tier::COUNT] = [
        Tier::Config,
        Tier::State,
        Tier::Alloc,
        Tier::Zio,
        Tier::Free,
        Tier::Vdev,
    ];

    /// Position of this tier in the acquisition order.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Mask containing only this tier.
    pub fn mask(self) -> LockMask {
        LockMask(1 << self.index())
    }

    fn name(self) -> &'static str {
        match self {
            Tier::Config => "CONFIG",
            Tier::State => "STATE",
            Tier::Alloc => "ALLOC",
            Tier::Zio => "ZIO",
            Tier::Free => "FREE",
            Tier::Vdev => "VDEV",
        }
    }
}

/// Access direction requested from a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RwDirection {
    /// Shared access.
    Reader,
    /// Exclusive access.
    Writer,
}

/// A set of tiers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LockMask(u8);

impl LockMask {
    /// The empty mask.
    pub const NONE: LockMask = LockMask(0);
    /// Only `Tier::Config`.
    pub const CONFIG: LockMask = LockMask(1 << 0);
    /// Only `Tier::State`.
    pub const STATE: LockMask = LockMask(1 << 1);
    /// Only `Tier::Alloc`.
    pub const ALLOC: LockMask = LockMask(1 << 2);
    /// Only `Tier::Zio`.
    pub const ZIO: LockMask = LockMask(1 << 3);
    /// Only `Tier::Free`.
    pub const FREE: LockMask = LockMask(1 << 4);
    /// Only `Tier::Vdev`.
    pub const VDEV: LockMask = LockMask(1 << 5);
    /// Every tier.
    pub const ALL: LockMask = LockMask((1 << Tier::COUNT) - 1);
    /// The tiers needed to change vdev state without changing the topology.
    pub const STATE_ALL: LockMask = LockMask((1 << 1) | (1 << 3));

    /// Builds a mask from raw bits, rejecting bits outside of `ALL`.
    pub fn from_bits(bits: u8) -> Option<Self> {
        if bits & !LockMask::ALL.0 == 0 {
            Some(LockMask(bits))
        } else {
            None
        }
    }

    /// Builds a mask from raw bits, silently dropping unknown bits.
    pub fn from_bits_truncate(bits: u8) -> Self {
        LockMask(bits & LockMask::ALL.0)
    }

    /// Raw bit representation.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Returns whether no tier is contained.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns whether `tier` is contained.
    pub fn contains(self, tier: Tier) -> bool {
        self.0 & tier.mask().0 != 0
    }

    /// The tiers ordered strictly before `tier` that are part of this mask.
    pub fn before(self, tier: Tier) -> LockMask {
        LockMask(self.0 & (tier.mask().0 - 1))
    }

    /// Iterates over the contained tiers in acquisition order.
    pub fn tiers(self) -> impl DoubleEndedIterator<Item = Tier> {
        static ORDER: [Tier; Tier::COUNT] = Tier::ALL;
        ORDER
            .iter()
            .cloned()
            .filter(move |&tier| self.contains(tier))
    }
}

impl From<Tier> for LockMask {
    fn from(tier: Tier) -> Self {
        tier.mask()
    }
}

impl BitOr for LockMask {
    type Output = LockMask;
    fn bitor(self, rhs: LockMask) -> LockMask {
        LockMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for LockMask {
    fn bitor_assign(&mut self, rhs: LockMask) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for LockMask {
    type Output = LockMask;
    fn bitand(self, rhs: LockMask) -> LockMask {
        LockMask(self.0 & rhs.0)
    }
}

impl Not for LockMask {
    type Output = LockMask;
    fn not(self) -> LockMask {
        LockMask(!self.0 & LockMask::ALL.0)
    }
}

impl fmt::Debug for LockMask {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "NONE");
        }
        write!(f, "{}", self.tiers().map(Tier::name).join("|"))
    }
}
