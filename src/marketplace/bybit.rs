use chrono::Utc;
use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, warn};

use crate::config::Credentials;
use crate::error::FetchError;
use crate::marketplace::Marketplace;
use crate::model::{Listing, Side};

const BYBIT_BASE_URL: &str = "https://api.bybit.com";
const ONLINE_ADS_PATH: &str = "/v5/p2p/item/online";
const RECV_WINDOW_MS: &str = "5000";
/// Largest page the online-ads endpoint serves.
const PAGE_SIZE: &str = "100";

type HmacSha256 = Hmac<Sha256>;

pub struct BybitP2p {
    client: reqwest::Client,
    credentials: Option<Credentials>,
}

impl BybitP2p {
    /// Client reading public advertisements; requests are signed when
    /// `credentials` is set.
    pub fn new(credentials: Option<Credentials>) -> Self {
        Self {
            client: reqwest::Client::new(),
            credentials,
        }
    }

    async fn fetch_online_ads(
        &self,
        asset: &str,
        currency: &str,
        side: Side,
    ) -> Result<Vec<Listing>, Report<FetchError>> {
        let request = OnlineAdsRequest {
            token_id: asset,
            currency_id: currency,
            side: side.bybit_code(),
            page: "1",
            size: PAGE_SIZE,
        };
        let body = serde_json::to_string(&request).change_context(FetchError::Request {
            marketplace: "bybit".into(),
        })?;

        let url = format!("{BYBIT_BASE_URL}{ONLINE_ADS_PATH}");
        let mut builder = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json");

        if let Some(creds) = &self.credentials {
            let timestamp = Utc::now().timestamp_millis().to_string();
            let signature = sign(
                creds.api_secret.expose(),
                &timestamp,
                &creds.api_key,
                RECV_WINDOW_MS,
                &body,
            );
            builder = builder
                .header("X-BAPI-API-KEY", &creds.api_key)
                .header("X-BAPI-TIMESTAMP", timestamp)
                .header("X-BAPI-RECV-WINDOW", RECV_WINDOW_MS)
                .header("X-BAPI-SIGN", signature);
        }

        let response = builder
            .body(body)
            .send()
            .await
            .change_context(FetchError::Request {
                marketplace: "bybit".into(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Report::new(FetchError::Status {
                marketplace: "bybit".into(),
                status: status.as_u16(),
            }));
        }

        let envelope: OnlineAdsResponse =
            response
                .json()
                .await
                .change_context(FetchError::ResponseParse {
                    marketplace: "bybit".into(),
                })?;

        let listings = envelope.into_listings()?;
        debug!(currency, side = %side, count = listings.len(), "bybit online ads fetched");
        Ok(listings)
    }
}

impl Default for BybitP2p {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Marketplace for BybitP2p {
    fn name(&self) -> &'static str {
        "bybit"
    }

    fn fetch_listings(
        &self,
        asset: &str,
        currency: &str,
        side: Side,
    ) -> BoxFuture<'_, Result<Vec<Listing>, Report<FetchError>>> {
        let asset = asset.to_owned();
        let currency = currency.to_owned();
        Box::pin(async move { self.fetch_online_ads(&asset, &currency, side).await })
    }
}

/// Hex HMAC-SHA256 of `timestamp + api_key + recv_window + payload`.
fn sign(secret: &str, timestamp: &str, api_key: &str, recv_window: &str, payload: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(timestamp.as_bytes());
    mac.update(api_key.as_bytes());
    mac.update(recv_window.as_bytes());
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

// ── Request / response types ──────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OnlineAdsRequest<'a> {
    token_id: &'a str,
    currency_id: &'a str,
    side: &'a str,
    page: &'a str,
    size: &'a str,
}

#[derive(Debug, Deserialize)]
struct OnlineAdsResponse {
    #[serde(alias = "retCode")]
    ret_code: i64,
    #[serde(alias = "retMsg", default)]
    ret_msg: String,
    result: Option<OnlineAdsResult>,
}

#[derive(Debug, Deserialize)]
struct OnlineAdsResult {
    #[serde(default)]
    items: Vec<BybitAd>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BybitAd {
    id: String,
    price: String,
    nick_name: String,
    #[serde(default)]
    payments: Vec<String>,
}

impl OnlineAdsResponse {
    /// Convert the envelope into listings. An ad whose price does not parse
    /// is skipped with a warning; the rest of the batch is kept.
    fn into_listings(self) -> Result<Vec<Listing>, Report<FetchError>> {
        if self.ret_code != 0 {
            return Err(Report::new(FetchError::Api {
                marketplace: "bybit".into(),
                code: self.ret_code,
            })
            .attach(format!("message: {}", self.ret_msg)));
        }

        let listings = self
            .result
            .map(|r| r.items)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|ad| match ad.into_listing() {
                Ok(listing) => Some(listing),
                Err(e) => {
                    warn!(error = ?e, "skipping bybit ad with unparsable price");
                    None
                }
            })
            .collect();
        Ok(listings)
    }
}

impl BybitAd {
    fn into_listing(self) -> Result<Listing, Report<FetchError>> {
        let price: f64 = self
            .price
            .trim()
            .parse::<f64>()
            .change_context(FetchError::ResponseParse {
                marketplace: "bybit".into(),
            })
            .attach_with(|| format!("ad {} has price \"{}\"", self.id, self.price))?;

        Ok(Listing {
            id: self.id,
            price,
            nickname: self.nick_name,
            payments: self.payments.into_iter().collect(),
        })
    }
}
