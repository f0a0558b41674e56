use std::collections::{BTreeSet, HashSet};
use std::fmt;

use crate::model::{Listing, Rule, Side};

const TRADE_URL_BASE: &str = "https://www.bybit.com/fiat/trade/otc";

/// When a matched listing is recorded as notified, relative to the send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Mark seen before sending. A failed send is never retried.
    #[default]
    AtMostOnce,
    /// Mark seen after a successful send. A failed send is retried next cycle.
    AtLeastOnce,
}

impl DeliveryMode {
    /// Parse a config-format string into a `DeliveryMode`.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "at-most-once" => Some(Self::AtMostOnce),
            "at-least-once" => Some(Self::AtLeastOnce),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AtMostOnce => "at-most-once",
            Self::AtLeastOnce => "at-least-once",
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identifiers of listings that were already notified.
///
/// Lives only in process memory; a restart starts from an empty set.
#[derive(Debug, Default, Clone)]
pub struct SeenSet {
    ids: HashSet<String>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Record `id`; returns `false` if it was already present.
    pub fn mark(&mut self, id: &str) -> bool {
        self.ids.insert(id.to_owned())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// A listing that satisfied a rule, with the message to deliver for it.
#[derive(Debug, Clone)]
pub struct Match {
    pub listing: Listing,
    pub message: String,
}

/// Select the new listings of `listings` that satisfy `rule`.
///
/// In [`DeliveryMode::AtMostOnce`] every returned listing is already marked in
/// `seen`. In [`DeliveryMode::AtLeastOnce`] `seen` is left untouched and the
/// caller marks each listing once its notification went out.
pub fn evaluate(
    rule: &Rule,
    asset: &str,
    listings: &[Listing],
    allowed_payments: &BTreeSet<String>,
    seen: &mut SeenSet,
    mode: DeliveryMode,
) -> Vec<Match> {
    let mut batch: HashSet<&str> = HashSet::new();
    let mut matches = Vec::new();

    for listing in listings {
        tracing::debug!(
            id = %listing.id,
            price = listing.price,
            payments = ?listing.payments,
            "listing"
        );

        if seen.contains(&listing.id) || !batch.insert(listing.id.as_str()) {
            tracing::debug!(id = %listing.id, "already notified, skipping");
            continue;
        }

        if rule.pm_required && !listing.accepts_any(allowed_payments) {
            tracing::debug!(id = %listing.id, "required payment method missing, skipping");
            continue;
        }

        if !rule.price_matches(listing.price) {
            continue;
        }

        tracing::debug!(id = %listing.id, rule = %rule, "listing matches rule");

        if mode == DeliveryMode::AtMostOnce {
            seen.mark(&listing.id);
        }

        matches.push(Match {
            message: format_notification(rule, asset, listing),
            listing: listing.clone(),
        });
    }

    matches
}

/// Render the chat message for a matching listing.
pub fn format_notification(rule: &Rule, asset: &str, listing: &Listing) -> String {
    let action = match rule.side {
        Side::Buy => "Buy",
        Side::Sell => "Sell",
    };
    let payments = listing
        .payments
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "🔥 P2P rate alert!\n\
         {action} {currency} ⇄ {asset}\n\
         Price: {price} {currency}/{asset}\n\
         Advertiser: {nickname} (ID {id})\n\
         Payment method IDs: {payments}\n\
         {TRADE_URL_BASE}/{side}/{asset}/{currency}",
        currency = rule.currency,
        price = listing.price,
        nickname = listing.nickname,
        id = listing.id,
        side = rule.side,
    )
}
