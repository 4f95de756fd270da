//! Formulas over two consecutive samples

use probewire_core::{ProbeWireError, ProbeWireResult};
use std::fmt;
use std::str::FromStr;

/// Values of one sample a formula works on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairPoint {
    /// Numerator projection
    pub n: f64,
    /// Denominator projection
    pub d: f64,
    /// Sample timestamp in ms
    pub t: f64,
}

/// Derived metric computed from an old and a new sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PairFormula {
    /// `t1 - t0`
    ElapsedTime,
    /// `n1 - n0`
    Delta,
    /// `n0 / d0`
    Fraction,
    /// `(n1 - n0) / (d1 - d0)`
    Average,
    /// `(n1 - n0) / (t1 - t0)`
    RatePerMillisecond,
    /// `(n1 - n0) / (t1 - t0) * 1000`
    RatePerSecond,
    /// `(n1 - n0) / (t1 - t0) * 100 / d1`
    MultiTimer,
    /// `(n1 - n0) / (t1 - t0) / (d1 - d0)`
    AverageTimer,
    /// `(d1 - (n1 - n0) / (t1 - t0)) * 100`
    MultiTimerInverse,
    /// `(1 - (n1 - n0) / (t1 - t0)) * 100`
    Timer100NsInverse,
}

impl PairFormula {
    /// Every formula
    pub const ALL: [PairFormula; 10] = [
        PairFormula::ElapsedTime,
        PairFormula::Delta,
        PairFormula::Fraction,
        PairFormula::Average,
        PairFormula::RatePerMillisecond,
        PairFormula::RatePerSecond,
        PairFormula::MultiTimer,
        PairFormula::AverageTimer,
        PairFormula::MultiTimerInverse,
        PairFormula::Timer100NsInverse,
    ];

    /// Query name
    #[must_use] pub fn name(self) -> &'static str {
        match self {
            PairFormula::ElapsedTime => "elapsed_time",
            PairFormula::Delta => "delta",
            PairFormula::Fraction => "fraction",
            PairFormula::Average => "average",
            PairFormula::RatePerMillisecond => "rate_per_millisecond",
            PairFormula::RatePerSecond => "rate_per_second",
            PairFormula::MultiTimer => "multi_timer",
            PairFormula::AverageTimer => "average_timer",
            PairFormula::MultiTimerInverse => "multi_timer_inverse",
            PairFormula::Timer100NsInverse => "timer_100_ns_inverse",
        }
    }

    /// Whether the formula reads the numerator projection
    #[must_use] pub fn needs_numerator(self) -> bool {
        self != PairFormula::ElapsedTime
    }

    /// Whether the formula reads the denominator projection
    #[must_use] pub fn needs_denominator(self) -> bool {
        matches!(
            self,
            PairFormula::Fraction
                | PairFormula::Average
                | PairFormula::MultiTimer
                | PairFormula::AverageTimer
                | PairFormula::MultiTimerInverse
        )
    }

    /// Evaluate on an old and a new point. Division by zero follows IEEE 754.
    #[must_use] pub fn compute(self, old: PairPoint, new: PairPoint) -> f64 {
        let dn = new.n - old.n;
        let dd = new.d - old.d;
        let dt = new.t - old.t;
        match self {
            PairFormula::ElapsedTime => dt,
            PairFormula::Delta => dn,
            PairFormula::Fraction => old.n / old.d,
            PairFormula::Average => dn / dd,
            PairFormula::RatePerMillisecond => dn / dt,
            PairFormula::RatePerSecond => dn / dt * 1000.0,
            PairFormula::MultiTimer => dn / dt * 100.0 / new.d,
            PairFormula::AverageTimer => dn / dt / dd,
            PairFormula::MultiTimerInverse => (new.d - dn / dt) * 100.0,
            PairFormula::Timer100NsInverse => (1.0 - dn / dt) * 100.0,
        }
    }
}

impl fmt::Display for PairFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PairFormula {
    type Err = ProbeWireError;

    fn from_str(s: &str) -> ProbeWireResult<Self> {
        PairFormula::ALL
            .into_iter()
            .find(|formula| formula.name() == s)
            .ok_or_else(|| ProbeWireError::config(format!("Unknown pair aggregate '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OLD: PairPoint = PairPoint { n: 10.0, d: 100.0, t: 1000.0 };
    const NEW: PairPoint = PairPoint { n: 20.0, d: 200.0, t: 2000.0 };

    #[test]
    fn test_formula_table() {
        let cases = [
            (PairFormula::ElapsedTime, 1000.0),
            (PairFormula::Delta, 10.0),
            (PairFormula::Fraction, 0.1),
            (PairFormula::Average, 0.1),
            (PairFormula::RatePerMillisecond, 0.01),
            (PairFormula::RatePerSecond, 10.0),
            (PairFormula::MultiTimer, 0.005),
            (PairFormula::AverageTimer, 0.0001),
            (PairFormula::MultiTimerInverse, 19_999.0),
            (PairFormula::Timer100NsInverse, 99.0),
        ];
        for (formula, expected) in cases {
            let actual = formula.compute(OLD, NEW);
            assert!((actual - expected).abs() < 1e-9, "{formula}: {actual} != {expected}");
        }
    }

    #[test]
    fn test_names_round_trip() {
        for formula in PairFormula::ALL {
            assert_eq!(formula.name().parse::<PairFormula>().unwrap(), formula);
        }
        assert!("ratio".parse::<PairFormula>().is_err());
    }

    #[test]
    fn test_projection_requirements() {
        assert!(!PairFormula::ElapsedTime.needs_numerator());
        assert!(PairFormula::Delta.needs_numerator());
        assert!(!PairFormula::Delta.needs_denominator());
        assert!(PairFormula::Fraction.needs_denominator());
        assert!(!PairFormula::Timer100NsInverse.needs_denominator());
    }

    #[test]
    fn test_zero_elapsed_time_is_not_a_panic() {
        let rate = PairFormula::RatePerSecond.compute(OLD, PairPoint { t: 1000.0, ..NEW });
        assert!(rate.is_infinite());
    }
}
