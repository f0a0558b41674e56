use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Trade direction of an advertisement, seen from the taker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }

    /// Return the Bybit P2P `side` code for this direction.
    pub fn bybit_code(self) -> &'static str {
        match self {
            Self::Buy => "0",
            Self::Sell => "1",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A price watch for one currency/side pair.
///
/// `max_price` and `min_price` are alternatives: a listing matches when it
/// satisfies either configured bound.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    pub currency: String,
    pub side: Side,
    pub max_price: Option<f64>,
    pub min_price: Option<f64>,
    #[serde(default)]
    pub pm_required: bool,
}

impl Rule {
    pub fn max(currency: &str, side: Side, max_price: f64) -> Self {
        Self {
            currency: currency.to_owned(),
            side,
            max_price: Some(max_price),
            min_price: None,
            pm_required: false,
        }
    }

    pub fn min(currency: &str, side: Side, min_price: f64) -> Self {
        Self {
            currency: currency.to_owned(),
            side,
            max_price: None,
            min_price: Some(min_price),
            pm_required: false,
        }
    }

    /// Whether `price` satisfies at least one configured bound.
    pub fn price_matches(&self, price: f64) -> bool {
        self.max_price.is_some_and(|max| price <= max)
            || self.min_price.is_some_and(|min| price >= min)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.currency, self.side)?;
        if let Some(max) = self.max_price {
            write!(f, " <= {max}")?;
        }
        if let Some(min) = self.min_price {
            write!(f, " >= {min}")?;
        }
        if self.pm_required {
            write!(f, " (payment required)")?;
        }
        Ok(())
    }
}

/// One online advertisement as returned by the marketplace.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub id: String,
    pub price: f64,
    pub nickname: String,
    pub payments: BTreeSet<String>,
}

impl Listing {
    pub fn accepts_any(&self, allowed: &BTreeSet<String>) -> bool {
        !self.payments.is_disjoint(allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_codes_match_bybit() {
        assert_eq!(Side::Buy.bybit_code(), "0");
        assert_eq!(Side::Sell.bybit_code(), "1");
    }

    #[test]
    fn side_deserializes_from_lowercase() {
        let side: Side = serde_json::from_str("\"sell\"").unwrap();
        assert_eq!(side, Side::Sell);
        assert!(serde_json::from_str::<Side>("\"BUY\"").is_err());
    }

    #[test]
    fn max_bound_is_inclusive() {
        let rule = Rule::max("JPY", Side::Buy, 140.0);
        assert!(rule.price_matches(139.5));
        assert!(rule.price_matches(140.0));
        assert!(!rule.price_matches(140.5));
    }

    #[test]
    fn min_bound_is_inclusive() {
        let rule = Rule::min("JPY", Side::Sell, 165.0);
        assert!(rule.price_matches(165.0));
        assert!(rule.price_matches(170.0));
        assert!(!rule.price_matches(164.9));
    }

    #[test]
    fn both_bounds_are_alternatives_not_a_range() {
        let rule = Rule {
            max_price: Some(100.0),
            min_price: Some(200.0),
            ..Rule::max("USD", Side::Buy, 100.0)
        };
        assert!(rule.price_matches(50.0));
        assert!(rule.price_matches(250.0));
        assert!(!rule.price_matches(150.0));
    }

    #[test]
    fn rule_without_bounds_never_matches() {
        let rule = Rule {
            max_price: None,
            ..Rule::max("USD", Side::Buy, 1.0)
        };
        assert!(!rule.price_matches(0.0));
    }

    #[test]
    fn rule_display_lists_bounds() {
        let rule = Rule {
            pm_required: true,
            ..Rule::max("EUR", Side::Buy, 0.863)
        };
        assert_eq!(rule.to_string(), "EUR/buy <= 0.863 (payment required)");
    }

    #[test]
    fn payment_overlap() {
        let listing = Listing {
            id: "B1".into(),
            price: 0.8,
            nickname: "trader".into(),
            payments: ["999".to_owned()].into(),
        };
        assert!(!listing.accepts_any(&["377".to_owned()].into()));
        assert!(listing.accepts_any(&["377".to_owned(), "999".to_owned()].into()));
    }
}
