use serde::Deserialize;

use crate::{models::kline::RawKline, providers::ProviderError};

/// Header carrying the request weight used in the current minute.
pub const USED_WEIGHT_HEADER: &str = "x-mbx-used-weight-1m";

/// One kline as it appears on the wire: a 12-element JSON array with prices as strings.
#[derive(Deserialize, Debug)]
pub struct BinanceKline(
    pub i64,
    pub String,
    pub String,
    pub String,
    pub String,
    pub String,
    pub i64,
    pub String,
    pub i64,
    pub String,
    pub String,
    pub String,
);

/// Error payload returned with non-2xx statuses.
#[derive(Deserialize, Debug)]
pub struct BinanceErrorBody {
    pub code: i64,
    pub msg: String,
}

fn decimal(field: &'static str, raw: &str) -> Result<f64, ProviderError> {
    raw.parse::<f64>()
        .map_err(|_| ProviderError::Malformed(format!("{field}: not a number: {raw:?}")))
}

impl TryFrom<BinanceKline> for RawKline {
    type Error = ProviderError;

    fn try_from(k: BinanceKline) -> Result<Self, Self::Error> {
        Ok(RawKline {
            open_time: k.0,
            open: decimal("open", &k.1)?,
            high: decimal("high", &k.2)?,
            low: decimal("low", &k.3)?,
            close: decimal("close", &k.4)?,
            volume: decimal("volume", &k.5)?,
            close_time: k.6,
            quote_volume: decimal("quote_volume", &k.7)?,
            trade_count: k.8,
            taker_buy_base_volume: decimal("taker_buy_base_volume", &k.9)?,
            taker_buy_quote_volume: decimal("taker_buy_quote_volume", &k.10)?,
            ignored: decimal("ignored", &k.11)?,
        })
    }
}

/// Decode a klines response body.
pub fn parse_klines(body: &[u8]) -> Result<Vec<RawKline>, ProviderError> {
    let wire: Vec<BinanceKline> =
        serde_json::from_slice(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;
    wire.into_iter().map(RawKline::try_from).collect()
}

/// Read the used-weight header, ignoring absent or garbled values.
pub fn used_weight(headers: &reqwest::header::HeaderMap) -> Option<u32> {
    headers
        .get(USED_WEIGHT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}
