use std::fmt;
use std::ops::{Add, AddAssign};

/// How many items a subscriber still permits its producer to deliver.
///
/// A demand is never negative: [`Demand::from_signed`] clamps anything below zero to [`Demand::none`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Demand {
    /// No limit - the producer may deliver as many items as it likes
    Unlimited,
    /// At most this many more items
    Max(usize),
}

impl Demand {
    /// Exhausted demand. Requesting this from a demand-gated producer terminates it.
    pub const fn none() -> Self { Demand::Max(0) }

    pub const fn max(count: usize) -> Self { Demand::Max(count) }

    pub const fn unlimited() -> Self { Demand::Unlimited }

    /// Normalizes a signed count. Zero and negative amounts both become [`Demand::none`].
    pub fn from_signed(count: i64) -> Self { Demand::Max(usize::try_from(count).unwrap_or(0)) }

    pub fn is_none(&self) -> bool { matches!(self, Demand::Max(0)) }

    pub fn is_unlimited(&self) -> bool { matches!(self, Demand::Unlimited) }

    /// The finite count, or `None` for unlimited demand
    pub fn count(&self) -> Option<usize> {
        match self {
            Demand::Unlimited => None,
            Demand::Max(count) => Some(*count),
        }
    }

    /// The demand left after delivering exactly one item
    pub fn decremented(self) -> Self {
        match self {
            Demand::Unlimited => Demand::Unlimited,
            Demand::Max(count) => Demand::Max(count.saturating_sub(1)),
        }
    }
}

impl Default for Demand {
    fn default() -> Self { Demand::none() }
}

impl Add for Demand {
    type Output = Demand;
    fn add(self, rhs: Demand) -> Demand {
        match (self, rhs) {
            (Demand::Max(a), Demand::Max(b)) => a.checked_add(b).map_or(Demand::Unlimited, Demand::Max),
            _ => Demand::Unlimited,
        }
    }
}

impl AddAssign for Demand {
    fn add_assign(&mut self, rhs: Demand) { *self = *self + rhs; }
}

impl From<usize> for Demand {
    fn from(count: usize) -> Self { Demand::Max(count) }
}

impl fmt::Display for Demand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Demand::Unlimited => write!(f, "unlimited"),
            Demand::Max(count) => write!(f, "max({count})"),
        }
    }
}
