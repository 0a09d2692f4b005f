use std::{
    fmt,
    ops::{Add, AddAssign},
};

/// Number of further values a subscriber is willing to receive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Demand {
    Max(u64),
    Unlimited,
}

impl Demand {
    pub const fn none() -> Self {
        Demand::Max(0)
    }

    pub const fn max(n: u64) -> Self {
        Demand::Max(n)
    }

    pub const fn unlimited() -> Self {
        Demand::Unlimited
    }

    pub fn is_none(&self) -> bool {
        *self == Demand::Max(0)
    }

    /// Demand left after one delivery.
    pub(crate) fn consume_one(self) -> Self {
        match self {
            Demand::Max(n) => Demand::Max(n.saturating_sub(1)),
            Demand::Unlimited => Demand::Unlimited,
        }
    }
}

impl Default for Demand {
    fn default() -> Self {
        Demand::none()
    }
}

impl Add for Demand {
    type Output = Demand;

    fn add(self, rhs: Demand) -> Demand {
        match (self, rhs) {
            (Demand::Max(a), Demand::Max(b)) => Demand::Max(a.saturating_add(b)),
            _ => Demand::Unlimited,
        }
    }
}

impl AddAssign for Demand {
    fn add_assign(&mut self, rhs: Demand) {
        *self = *self + rhs;
    }
}

impl fmt::Display for Demand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Demand::Max(n) => write!(f, "max({})", n),
            Demand::Unlimited => write!(f, "unlimited"),
        }
    }
}
