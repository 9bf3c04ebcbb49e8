//! Fixed-point USDC amounts.
//!
//! The IVXP wire format carries USDC amounts as decimal strings with exactly
//! six fractional digits (e.g. `"10.000000"`). Internally an amount is an
//! integer count of micro-USDC, which makes budget comparisons exact and
//! keeps floating point out of every money path.

use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;

/// Number of fractional digits in the USDC wire format.
pub const USDC_DECIMALS: u32 = 6;

const MICROS_PER_USDC: u64 = 1_000_000;

/// A non-negative USDC amount held as integer micro-USDC.
///
/// Display and serde always produce the canonical wire form with exactly
/// six fractional digits. Parsing accepts up to six fractional digits;
/// more is an error rather than a silent rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UsdcAmount(u64);

impl UsdcAmount {
    /// Zero USDC.
    pub const ZERO: UsdcAmount = UsdcAmount(0);

    /// Construct from a count of micro-USDC (10^-6 USDC).
    pub fn from_micros(micros: u64) -> Self {
        UsdcAmount(micros)
    }

    /// Construct from whole USDC.
    pub fn from_usdc(usdc: u64) -> Self {
        UsdcAmount(usdc * MICROS_PER_USDC)
    }

    /// The amount as integer micro-USDC.
    pub fn micros(&self) -> u64 {
        self.0
    }

    /// Whether the amount is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Convert a floating-point USDC value by rounding to the nearest
    /// micro-USDC, the conversion used when comparing quotes to budgets.
    pub fn try_from_f64(value: f64) -> Result<Self, AmountError> {
        if !value.is_finite() {
            return Err(AmountError::InvalidFormat);
        }
        if value < 0.0 {
            return Err(AmountError::Negative);
        }
        let decimal = Decimal::from_f64(value).ok_or(AmountError::InvalidFormat)?;
        let micros = (decimal * Decimal::from(MICROS_PER_USDC))
            .round()
            .to_u64()
            .ok_or(AmountError::OutOfRange)?;
        Ok(UsdcAmount(micros))
    }

    /// Parse a decimal string into an amount.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a number, is negative, or has
    /// more than six fractional digits.
    pub fn parse(input: &str) -> Result<Self, AmountError> {
        let parsed = Decimal::from_str(input.trim()).map_err(|_| AmountError::InvalidFormat)?;
        if parsed.is_sign_negative() {
            return Err(AmountError::Negative);
        }
        if parsed.scale() > USDC_DECIMALS {
            return Err(AmountError::TooPrecise {
                scale: parsed.scale(),
            });
        }
        let micros = (parsed * Decimal::from(MICROS_PER_USDC))
            .to_u64()
            .ok_or(AmountError::OutOfRange)?;
        Ok(UsdcAmount(micros))
    }
}

/// Errors that can occur when parsing or converting a USDC amount.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AmountError {
    /// The input could not be parsed as a number.
    #[error("Invalid USDC amount format")]
    InvalidFormat,
    /// Negative amounts are not allowed.
    #[error("Negative USDC amount is not allowed")]
    Negative,
    /// The input has more fractional digits than USDC supports.
    #[error("Too many fractional digits: {scale} vs {USDC_DECIMALS} on USDC")]
    TooPrecise { scale: u32 },
    /// The value does not fit the micro-USDC range.
    #[error("USDC amount out of range")]
    OutOfRange,
}

impl Display for UsdcAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:06}",
            self.0 / MICROS_PER_USDC,
            self.0 % MICROS_PER_USDC
        )
    }
}

impl FromStr for UsdcAmount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UsdcAmount::parse(s)
    }
}

impl Serialize for UsdcAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for UsdcAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Budgets in service requests may arrive as JSON numbers from older
        // clients; amounts on every other message are strings.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum StringOrNumber {
            String(String),
            Number(f64),
        }
        match StringOrNumber::deserialize(deserializer)? {
            StringOrNumber::String(s) => UsdcAmount::parse(&s).map_err(serde::de::Error::custom),
            StringOrNumber::Number(n) => {
                UsdcAmount::try_from_f64(n).map_err(serde::de::Error::custom)
            }
        }
    }
}
