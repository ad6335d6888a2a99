use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ReaderError, ReelError};

/// A rational number used for frame rates, pixel ratios and time bases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fraction {
    pub num: i32,
    pub den: i32,
}

impl Default for Fraction {
    fn default() -> Self {
        Self { num: 1, den: 1 }
    }
}

impl Fraction {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    pub fn to_f64(&self) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        self.num as f64 / self.den as f64
    }

    pub fn to_f32(&self) -> f32 {
        self.to_f64() as f32
    }

    /// Rounded integer value
    pub fn to_int(&self) -> i32 {
        self.to_f64().round() as i32
    }

    fn gcd_unsigned(&self) -> u32 {
        let (mut a, mut b) = (self.num.unsigned_abs(), self.den.unsigned_abs());
        while b != 0 {
            let t = b;
            b = a % b;
            a = t;
        }
        a
    }

    /// Greatest common divisor of numerator and denominator, saturating at `i32::MAX`
    pub fn gcd(&self) -> i32 {
        i32::try_from(self.gcd_unsigned()).unwrap_or(i32::MAX)
    }

    /// Reduce in place to lowest terms
    pub fn reduce(&mut self) {
        let gcd = self.gcd_unsigned() as i64;
        if gcd > 1 {
            self.num = (self.num as i64 / gcd) as i32;
            self.den = (self.den as i64 / gcd) as i32;
        }
    }

    pub fn reduced(mut self) -> Self {
        self.reduce();
        self
    }

    /// Swap numerator and denominator
    pub fn reciprocal(&self) -> Self {
        Self { num: self.den, den: self.num }
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl FromStr for Fraction {
    type Err = ReelError;

    /// Accepts `30000/1001`, `16:9` or a bare integer
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || -> ReelError {
            ReaderError::InvalidFormat { details: format!("invalid fraction '{}'", s) }.into()
        };

        let s = s.trim();
        let (num, den) = match s.split_once(|c| c == '/' || c == ':') {
            Some((n, d)) => (n.trim(), d.trim()),
            None => (s, "1"),
        };

        let num = num.parse::<i32>().map_err(|_| invalid())?;
        let den = den.parse::<i32>().map_err(|_| invalid())?;
        Ok(Self { num, den })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce() {
        let mut f = Fraction::new(30000, 1000);
        f.reduce();
        assert_eq!(f, Fraction::new(30, 1));
        assert_eq!(Fraction::new(1920, 1080).reduced(), Fraction::new(16, 9));
    }

    #[test]
    fn test_extreme_values() {
        assert_eq!(Fraction::new(i32::MIN, 2).gcd(), 2);
        assert_eq!(Fraction::new(i32::MIN, 2).reduced(), Fraction::new(i32::MIN / 2, 1));
        assert_eq!(Fraction::new(i32::MIN, 0).gcd(), i32::MAX);
        assert_eq!(Fraction::new(i32::MIN, 0).reduced(), Fraction::new(-1, 0));
        assert_eq!(Fraction::new(-6, 4).reduced(), Fraction::new(-3, 2));
    }

    #[test]
    fn test_values() {
        let ntsc = Fraction::new(30000, 1001);
        assert!((ntsc.to_f64() - 29.97).abs() < 0.01);
        assert_eq!(ntsc.to_int(), 30);
        assert_eq!(ntsc.reciprocal(), Fraction::new(1001, 30000));
        assert_eq!(Fraction::new(1, 0).to_f64(), 0.0);
    }

    #[test]
    fn test_parse() {
        assert_eq!("30000/1001".parse::<Fraction>().unwrap(), Fraction::new(30000, 1001));
        assert_eq!("16:9".parse::<Fraction>().unwrap(), Fraction::new(16, 9));
        assert_eq!("25".parse::<Fraction>().unwrap(), Fraction::new(25, 1));
        assert!("abc/2".parse::<Fraction>().is_err());
    }
}
