use std::fmt::{Display, Formatter};
use std::ops::{Index, IndexMut};
use std::str::FromStr;

/// The three ordered storage tiers a resource can occupy.
///
/// `Drive` means "exists on backing storage" and is never allocated or freed, `Ram` is decoded
/// CPU-resident data and `Gpu` is the uploaded/bound representation. The derived ordering is the
/// tier ladder: `Drive < Ram < Gpu`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Tier {
    #[default]
    Drive,
    Ram,
    Gpu,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Drive, Tier::Ram, Tier::Gpu];

    /// Saturating successor, `Gpu.next() == Gpu`.
    pub const fn next(self) -> Tier {
        match self {
            Tier::Drive => Tier::Ram,
            Tier::Ram | Tier::Gpu => Tier::Gpu,
        }
    }

    /// Saturating predecessor, `Drive.previous() == Drive`.
    pub const fn previous(self) -> Tier {
        match self {
            Tier::Drive | Tier::Ram => Tier::Drive,
            Tier::Gpu => Tier::Ram,
        }
    }

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            Tier::Drive => "DRIVE",
            Tier::Ram => "RAM",
            Tier::Gpu => "GPU",
        }
    }
}

impl Display for Tier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drive" => Ok(Tier::Drive),
            // "cpu" is a common name for the in-memory tier
            "ram" | "cpu" => Ok(Tier::Ram),
            "gpu" => Ok(Tier::Gpu),
            other => Err(format!("Unknown tier '{}', expected one of drive, ram, gpu", other)),
        }
    }
}

/// Per-tier outstanding request counters, indexable by [`Tier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TierCounts([u32; 3]);

impl TierCounts {
    pub const fn new(drive: u32, ram: u32, gpu: u32) -> Self {
        Self([drive, ram, gpu])
    }

    /// The highest tier with a non-zero count, `Drive` if there is none.
    pub fn highest_requested(&self) -> Tier {
        Tier::ALL
            .into_iter()
            .rev()
            .find(|tier| self[*tier] > 0)
            .unwrap_or(Tier::Drive)
    }

    pub fn total(&self) -> u32 {
        self.0.iter().sum()
    }
}

impl Index<Tier> for TierCounts {
    type Output = u32;

    fn index(&self, tier: Tier) -> &Self::Output {
        &self.0[tier.index()]
    }
}

impl IndexMut<Tier> for TierCounts {
    fn index_mut(&mut self, tier: Tier) -> &mut Self::Output {
        &mut self.0[tier.index()]
    }
}

impl Display for TierCounts {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "drive={} ram={} gpu={}", self.0[0], self.0[1], self.0[2])
    }
}
