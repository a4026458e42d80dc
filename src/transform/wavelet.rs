// src/transform/wavelet.rs

//! Wavelet descriptors: a lifting filter family plus a boundary policy.
//!
//! Lifting multipliers are constant tables attached to each family. A step
//! carries both a real coefficient (float path) and a dyadic rational
//! `numerator / 2^shift` approximating it (reversible integer path).

use std::f64::consts::SQRT_2;
use std::fmt;
use std::str::FromStr;

use super::TransformError;

/// Which interleaved band a lifting step writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    Low,
    High,
}

/// One predict or update step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiftingStep {
    pub target: Band,
    pub coefficient: f64,
    pub numerator: i64,
    pub shift: u32,
}

const fn step(target: Band, coefficient: f64, numerator: i64, shift: u32) -> LiftingStep {
    LiftingStep {
        target,
        coefficient,
        numerator,
        shift,
    }
}

// CDF 9/7 lifting factorization
const CDF97_ALPHA: f64 = -1.58615986717275;
const CDF97_BETA: f64 = -0.05297864003258;
const CDF97_GAMMA: f64 = 0.88293362717904;
const CDF97_DELTA: f64 = 0.44350482244527;
const CDF97_EPSILON: f64 = 1.14960430535816;

const CDF97_STEPS: [LiftingStep; 4] = [
    step(Band::High, CDF97_ALPHA, -203, 7),
    step(Band::Low, CDF97_BETA, -217, 12),
    step(Band::High, CDF97_GAMMA, 113, 7),
    step(Band::Low, CDF97_DELTA, 1817, 12),
];

const CDF53_STEPS: [LiftingStep; 2] = [
    step(Band::High, -0.5, -1, 1),
    step(Band::Low, 0.25, 1, 2),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterFamily {
    /// Cohen-Daubechies-Feauveau 9/7
    Cdf97,
    /// Cohen-Daubechies-Feauveau 5/3 (LeGall)
    Cdf53,
}

impl FilterFamily {
    pub fn steps(self) -> &'static [LiftingStep] {
        match self {
            FilterFamily::Cdf97 => &CDF97_STEPS,
            FilterFamily::Cdf53 => &CDF53_STEPS,
        }
    }

    /// Final normalization: lowpass is multiplied by this, highpass divided by its negation.
    pub fn scale(self) -> f64 {
        match self {
            FilterFamily::Cdf97 => CDF97_EPSILON,
            FilterFamily::Cdf53 => SQRT_2,
        }
    }

    pub(crate) fn id(self) -> u8 {
        match self {
            FilterFamily::Cdf97 => 0,
            FilterFamily::Cdf53 => 1,
        }
    }

    pub(crate) fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(FilterFamily::Cdf97),
            1 => Some(FilterFamily::Cdf53),
            _ => None,
        }
    }
}

impl FromStr for FilterFamily {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .trim_end_matches(".lft")
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "cdf97" => Ok(FilterFamily::Cdf97),
            "cdf53" | "legall53" => Ok(FilterFamily::Cdf53),
            _ => Err(TransformError::UnknownFilter(s.to_string())),
        }
    }
}

impl fmt::Display for FilterFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterFamily::Cdf97 => write!(f, "CDF-9.7"),
            FilterFamily::Cdf53 => write!(f, "CDF-5.3"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Boundary {
    #[default]
    Symmetric,
    Periodic,
    /// Extrapolating boundary filters; falls back to symmetric below 4 samples.
    BoundaryWavelet,
}

impl Boundary {
    pub(crate) fn id(self) -> u8 {
        match self {
            Boundary::Symmetric => 0,
            Boundary::Periodic => 1,
            Boundary::BoundaryWavelet => 2,
        }
    }

    pub(crate) fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Boundary::Symmetric),
            1 => Some(Boundary::Periodic),
            2 => Some(Boundary::BoundaryWavelet),
            _ => None,
        }
    }
}

impl FromStr for Boundary {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "symmetric" => Ok(Boundary::Symmetric),
            "periodic" => Ok(Boundary::Periodic),
            "boundary" | "boundary-wavelet" => Ok(Boundary::BoundaryWavelet),
            _ => Err(TransformError::UnknownBoundary(s.to_string())),
        }
    }
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Boundary::Symmetric => write!(f, "symmetric"),
            Boundary::Periodic => write!(f, "periodic"),
            Boundary::BoundaryWavelet => write!(f, "boundary"),
        }
    }
}

/// Immutable wavelet descriptor, shared freely across transform calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Wavelet {
    family: FilterFamily,
    boundary: Boundary,
}

impl Wavelet {
    pub const fn new(family: FilterFamily, boundary: Boundary) -> Self {
        Self { family, boundary }
    }

    pub const fn cdf97() -> Self {
        Self::new(FilterFamily::Cdf97, Boundary::Symmetric)
    }

    pub const fn cdf53() -> Self {
        Self::new(FilterFamily::Cdf53, Boundary::Symmetric)
    }

    /// Builds a descriptor from textual names, e.g. `("CDF-9.7.lft", "symmetric")`.
    pub fn from_names(filter: &str, boundary: &str) -> Result<Self, TransformError> {
        Ok(Self::new(filter.parse()?, boundary.parse()?))
    }

    pub fn family(&self) -> FilterFamily {
        self.family
    }

    pub fn boundary(&self) -> Boundary {
        self.boundary
    }

    pub fn with_boundary(self, boundary: Boundary) -> Self {
        Self { boundary, ..self }
    }
}

impl Default for Wavelet {
    fn default() -> Self {
        Self::cdf97()
    }
}

impl fmt::Display for Wavelet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.family, self.boundary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!("CDF-9.7.lft".parse::<FilterFamily>().unwrap(), FilterFamily::Cdf97);
        assert_eq!("cdf53".parse::<FilterFamily>().unwrap(), FilterFamily::Cdf53);
        assert_eq!("Periodic".parse::<Boundary>().unwrap(), Boundary::Periodic);
        assert!("haar".parse::<FilterFamily>().is_err());
        assert!("mirror".parse::<Boundary>().is_err());

        let w = Wavelet::from_names("CDF-5.3", "boundary").unwrap();
        assert_eq!(w.family(), FilterFamily::Cdf53);
        assert_eq!(w.boundary(), Boundary::BoundaryWavelet);
    }

    #[test]
    fn test_integer_steps_track_real_coefficients() {
        for family in [FilterFamily::Cdf97, FilterFamily::Cdf53] {
            for s in family.steps() {
                let approx = s.numerator as f64 / (1u64 << s.shift) as f64;
                assert!((approx - s.coefficient).abs() < 0.01, "{:?}", s);
            }
        }
    }

    #[test]
    fn test_ids_round_trip() {
        for b in [Boundary::Symmetric, Boundary::Periodic, Boundary::BoundaryWavelet] {
            assert_eq!(Boundary::from_id(b.id()), Some(b));
        }
        assert_eq!(FilterFamily::from_id(FilterFamily::Cdf53.id()), Some(FilterFamily::Cdf53));
        assert_eq!(FilterFamily::from_id(9), None);
    }
}
