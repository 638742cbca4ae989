use crate::{
    models::request_params::{KlineRequest, MAX_LIMIT},
    providers::ProviderError,
};

/// Reject requests the endpoint would refuse anyway.
pub fn validate_request(req: &KlineRequest) -> Result<(), ProviderError> {
    if req.symbol.is_empty() || !req.symbol.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(ProviderError::Validation(format!(
            "symbol must be non-empty ASCII alphanumeric, got {:?}",
            req.symbol
        )));
    }
    if req.limit == 0 || req.limit > MAX_LIMIT {
        return Err(ProviderError::Validation(format!(
            "limit must be in 1..={MAX_LIMIT}, got {}",
            req.limit
        )));
    }
    if req.end_ms < req.start_ms {
        return Err(ProviderError::Validation(format!(
            "end {} precedes start {}",
            req.end_ms, req.start_ms
        )));
    }
    Ok(())
}

/// Build the query string pairs for `GET /api/v3/klines`.
pub fn construct_params(req: &KlineRequest) -> Vec<(&'static str, String)> {
    vec![
        ("symbol", req.symbol.to_ascii_uppercase()),
        ("interval", req.interval.to_string()),
        ("startTime", req.start_ms.to_string()),
        ("endTime", req.end_ms.to_string()),
        ("limit", req.limit.to_string()),
    ]
}

/// Query for the very first kline of a symbol: one row starting at epoch 0.
pub fn earliest_params(symbol: &str, interval: &str) -> Vec<(&'static str, String)> {
    vec![
        ("symbol", symbol.to_ascii_uppercase()),
        ("interval", interval.to_string()),
        ("startTime", "0".to_string()),
        ("limit", "1".to_string()),
    ]
}
