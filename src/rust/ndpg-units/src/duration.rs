// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use num_traits::{AsPrimitive, Float, Zero};
use serde::{Deserialize, Serialize};
use std::fmt::Result as FormatterResult;
use std::fmt::{self, Debug, Display, Formatter};
use std::ops::{Add, Div, Mul, Sub};

/// A duration represented with unit type.
///
/// # Type Parameter
/// - `U`: The unit of the value (should be a zero-sized type)
/// - `T`: The underlying value (a floating point number for seconds, an integer for clock cycles)
///
/// # Examples
/// ```rust
/// use ndpg_units::duration::seconds;
///
/// let duration = seconds(100e-9); // Create a duration of 100 ns
/// ```
#[derive(Clone, Copy, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Duration<U, T = f64> {
    pub(crate) value: T,
    #[serde(skip)]
    pub(crate) unit: U,
}

impl<U, T: Copy> Duration<U, T> {
    pub fn value(&self) -> T {
        self.value
    }
}

impl<U, T: Zero + PartialEq> PartialEq for Duration<U, T> {
    fn eq(&self, other: &Self) -> bool {
        let a = &self.value;
        let b = &other.value;
        if a.is_zero() && b.is_zero() {
            true
        } else {
            a == b
        }
    }
}

impl<U, T: Zero + PartialEq> Eq for Duration<U, T> {}

impl<U, T: Zero + PartialOrd> PartialOrd for Duration<U, T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<U, T: Zero + PartialOrd> Ord for Duration<U, T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        if self.value < other.value {
            std::cmp::Ordering::Less
        } else if self.value > other.value {
            std::cmp::Ordering::Greater
        } else {
            std::cmp::Ordering::Equal
        }
    }
}

impl<U, T: Debug> Debug for Duration<U, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatterResult {
        f.debug_struct("Duration")
            .field("value", &self.value)
            .field("unit", &std::any::type_name::<U>())
            .finish()
    }
}

impl<U, T> Add for Duration<U, T>
where
    T: Add<Output = T> + Copy,
    U: Copy,
{
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Duration {
            value: self.value + rhs.value,
            unit: self.unit,
        }
    }
}

impl<U, T> Sub for Duration<U, T>
where
    T: Sub<Output = T> + Copy,
    U: Copy,
{
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Duration {
            value: self.value - rhs.value,
            unit: self.unit,
        }
    }
}

impl<U, T> Mul<T> for Duration<U, T>
where
    T: Mul<T, Output = T> + Copy,
    U: Copy,
{
    type Output = Self;

    fn mul(self, rhs: T) -> Self::Output {
        Duration {
            value: self.value * rhs,
            unit: self.unit,
        }
    }
}

impl<U, T> Div<T> for Duration<U, T>
where
    T: Div<T, Output = T> + Copy,
    U: Copy,
{
    type Output = Self;

    fn div(self, rhs: T) -> Self::Output {
        Duration {
            value: self.value / rhs,
            unit: self.unit,
        }
    }
}

fn round_to_significant_digits(x: f64, n: u32) -> f64 {
    if x == 0.0 {
        0.0
    } else {
        let order = x.abs().log10().floor();
        let scale = 10f64.powf((n as f64) - 1.0 - order);
        (x * scale).round() / scale
    }
}

impl<U, T> Display for Duration<U, T>
where
    T: Display + Debug + AsPrimitive<f64> + Float,
    U: Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            Display::fmt(&self.value, f)?;
        } else {
            // Rounding slightly below epsilon hides representation noise such as 1.1500000000000002e-6.
            let significand_digits = (-T::epsilon().log10() - T::one()).as_() as u32;
            let value = round_to_significant_digits(self.value.as_(), significand_digits);
            Debug::fmt(&value, f)?;
        }
        write!(f, " ")?;
        self.unit.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Seconds;

impl Display for Seconds {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatterResult {
        write!(f, "s")
    }
}

impl<T: Float, U: Default> From<T> for Duration<U, T> {
    fn from(value: T) -> Self {
        Duration {
            value,
            unit: U::default(),
        }
    }
}

impl<U> From<Duration<U, f64>> for f64 {
    fn from(duration: Duration<U, f64>) -> Self {
        duration.value
    }
}

pub const fn seconds<T>(value: T) -> Duration<Seconds, T> {
    Duration {
        value,
        unit: Seconds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation() {
        let duration: Duration<Seconds> = 1e-6.into();
        assert_eq!(duration.value, 1e-6);
    }

    #[test]
    fn test_display() {
        let duration: Duration<Seconds> = 1e-6.into();
        assert_eq!(format!("{duration}"), "1e-6 s");

        let duration: Duration<Seconds> = 1.1500000000000002e-6.into();
        assert_eq!(format!("{duration}"), "1.15e-6 s");
    }

    #[test]
    fn test_eq() {
        assert_eq!(seconds(0.0), seconds(-0.0));
        assert_ne!(seconds(1e-6), seconds(2e-6));
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(seconds(1e-6) + seconds(1e-6), seconds(2e-6));
        assert_eq!(seconds(3.0) - seconds(1.0), seconds(2.0));
        assert_eq!(seconds(200e-9) / 2.0, seconds(100e-9));
        assert!(seconds(1e-6) < seconds(2e-6));
    }
}
