//! The `(Power, EnergyTotal)` pair attached to every workload, per zone and per GPU.

use std::ops::{Add, AddAssign};

/// Power for the last interval, and the cumulative energy total.
///
/// `energy_total_uj` is monotonically non-decreasing over a workload's
/// observed lifetime (invariant 4 of the data model).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub power_uw: u64,
    pub energy_total_uj: u64,
}

impl Usage {
    pub fn new(power_uw: u64, energy_total_uj: u64) -> Self {
        Self {
            power_uw,
            energy_total_uj,
        }
    }
}

/// Aggregation of member `Usage`s is field-wise addition: this is how
/// containers, pods and VMs are built from their members (invariant 3).
impl Add for Usage {
    type Output = Usage;

    fn add(self, rhs: Usage) -> Usage {
        Usage {
            power_uw: self.power_uw + rhs.power_uw,
            energy_total_uj: self.energy_total_uj + rhs.energy_total_uj,
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Usage) {
        *self = *self + rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregation_is_field_wise_sum() {
        let a = Usage::new(100, 1000);
        let b = Usage::new(50, 500);
        assert_eq!(a + b, Usage::new(150, 1500));
    }
}
