pub mod bybit;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::FetchError;
use crate::model::{Listing, Side};

/// Source of online P2P advertisements.
///
/// Uses `BoxFuture` instead of `async fn` in trait to keep the trait
/// object-safe (`dyn Marketplace`).
pub trait Marketplace: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fetch the advertisements currently online for `asset` quoted in
    /// `currency` on the given `side`.
    fn fetch_listings(
        &self,
        asset: &str,
        currency: &str,
        side: Side,
    ) -> BoxFuture<'_, Result<Vec<Listing>, Report<FetchError>>>;
}
