//! Normalized types shared by every venue adapter and the order-book store.

use std::fmt;
use std::ops::{Add, Neg, Sub};
use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::FeedError;

/// Buy or sell side of a price level.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    /// `true` amounts are stored as BID, `false` as ASK — the sign convention
    /// several venues (bitfinex, gdax full-book synth) use on the wire.
    pub fn from_signed_amount(amount: Decimal) -> Self {
        if amount.is_sign_negative() {
            Side::Ask
        } else {
            Side::Bid
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Bid => write!(f, "bid"),
            Side::Ask => write!(f, "ask"),
        }
    }
}

/// A canonical pair identifier, e.g. `BTC-USD`. Cheaply cloneable since the
/// same pair is threaded through every frame handled for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pair(Arc<str>);

impl Pair {
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Pair {
    fn from(s: &str) -> Self {
        Pair::new(s)
    }
}

impl From<String> for Pair {
    fn from(s: String) -> Self {
        Pair(Arc::from(s))
    }
}

/// Arbitrary-precision price. Never constructed from a binary float.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

/// Arbitrary-precision size/amount. Never constructed from a binary float.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Size(pub Decimal);

macro_rules! decimal_newtype {
    ($t:ident) => {
        impl $t {
            pub fn zero() -> Self {
                $t(Decimal::ZERO)
            }

            pub fn is_zero(&self) -> bool {
                self.0.is_zero()
            }

            pub fn abs(&self) -> Self {
                $t(self.0.abs())
            }

            pub fn normalized(&self) -> Self {
                $t(self.0.normalize())
            }
        }

        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $t {
            type Err = FeedError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Decimal::from_str(s)
                    .map($t)
                    .map_err(|e| FeedError::ProtocolMalformed(format!("invalid decimal {s:?}: {e}")))
            }
        }

        impl Add for $t {
            type Output = $t;
            fn add(self, rhs: $t) -> $t {
                $t(self.0 + rhs.0)
            }
        }

        impl Sub for $t {
            type Output = $t;
            fn sub(self, rhs: $t) -> $t {
                $t(self.0 - rhs.0)
            }
        }

        impl Neg for $t {
            type Output = $t;
            fn neg(self) -> $t {
                $t(-self.0)
            }
        }
    };
}

decimal_newtype!(Price);
decimal_newtype!(Size);

/// Parses a JSON-text number or string into a [`Decimal`] without ever
/// constructing a binary float. Requires `serde_json`'s `arbitrary_precision`
/// feature so that `Number`'s textual representation round-trips exactly.
pub fn decimal_from_json(value: &serde_json::Value) -> Result<Decimal, FeedError> {
    match value {
        serde_json::Value::String(s) => Decimal::from_str(s)
            .map_err(|e| FeedError::ProtocolMalformed(format!("invalid decimal {s:?}: {e}"))),
        serde_json::Value::Number(n) => {
            let text = n.to_string();
            Decimal::from_str(&text)
                .map_err(|e| FeedError::ProtocolMalformed(format!("invalid decimal {text:?}: {e}")))
        }
        other => Err(FeedError::ProtocolMalformed(format!(
            "expected numeric value, got {other:?}"
        ))),
    }
}

pub fn price_from_json(value: &serde_json::Value) -> Result<Price, FeedError> {
    decimal_from_json(value).map(Price)
}

pub fn size_from_json(value: &serde_json::Value) -> Result<Size, FeedError> {
    decimal_from_json(value).map(Size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Any decimal value, at any scale, survives `decimal_from_json`
        /// unchanged whether the wire sent it as a JSON number or a quoted
        /// string — the whole point of `arbitrary_precision` (§3 "no binary
        /// float").
        #[test]
        fn decimal_from_json_roundtrips_arbitrary_values(
            mantissa in -999_999_999_999i64..999_999_999_999i64,
            scale in 0u32..10u32,
        ) {
            let decimal = Decimal::new(mantissa, scale);
            let text = decimal.to_string();
            let as_number: serde_json::Value = serde_json::from_str(&text).unwrap();
            let as_string = serde_json::Value::String(text.clone());

            prop_assert_eq!(decimal_from_json(&as_number).unwrap(), decimal);
            prop_assert_eq!(decimal_from_json(&as_string).unwrap(), decimal);
        }
    }

    #[test]
    fn decimal_equality_is_scale_insensitive() {
        let a = Price::from_str("0.10").unwrap();
        let b = Price::from_str("0.1").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn decimal_from_json_handles_number_and_string() {
        let v: serde_json::Value = serde_json::from_str("100.50").unwrap();
        assert_eq!(decimal_from_json(&v).unwrap().to_string(), "100.50");

        let v: serde_json::Value = serde_json::from_str("\"100.50\"").unwrap();
        assert_eq!(decimal_from_json(&v).unwrap().to_string(), "100.50");
    }

    #[test]
    fn side_from_signed_amount() {
        assert_eq!(Side::from_signed_amount(Decimal::from_str("-1").unwrap()), Side::Ask);
        assert_eq!(Side::from_signed_amount(Decimal::from_str("1").unwrap()), Side::Bid);
        assert_eq!(Side::from_signed_amount(Decimal::ZERO), Side::Bid);
    }
}
