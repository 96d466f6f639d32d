//! Request signing for the exchange REST APIs.
//!
//! Both venues authenticate private endpoints with a hex-encoded
//! HMAC-SHA256 over a venue-specific payload:
//! - Binance: the sorted query string including `timestamp`
//! - Bybit v5: `timestamp + api_key + recv_window + (query | body)`

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::ExchangeError;

type HmacSha256 = Hmac<Sha256>;

/// Receive window sent with every signed Bybit request, in milliseconds.
pub const BYBIT_RECV_WINDOW: &str = "5000";

/// Current Unix time in milliseconds.
pub fn timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Hex HMAC-SHA256 of `payload` keyed by `secret`.
pub fn hmac_sha256_hex(secret: &str, payload: &str) -> Result<String, ExchangeError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::Signing(e.to_string()))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build a Binance query string: keys sorted, `timestamp` added, `signature` appended.
pub fn binance_signed_query(
    secret: &str,
    params: &[(&str, String)],
    timestamp: i64,
) -> Result<String, ExchangeError> {
    let mut pairs: Vec<(&str, String)> = params.to_vec();
    pairs.push(("timestamp", timestamp.to_string()));
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    let query = pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    let signature = hmac_sha256_hex(secret, &query)?;

    Ok(format!("{query}&signature={signature}"))
}

/// Headers for a signed Bybit v5 request; `payload` is the query string for
/// GET or the compact JSON body for POST.
pub fn bybit_auth_headers(
    api_key: &str,
    secret: &str,
    payload: &str,
    timestamp: i64,
) -> Result<Vec<(&'static str, String)>, ExchangeError> {
    let ts = timestamp.to_string();
    let sign = hmac_sha256_hex(secret, &format!("{ts}{api_key}{BYBIT_RECV_WINDOW}{payload}"))?;

    Ok(vec![
        ("X-BAPI-API-KEY", api_key.to_string()),
        ("X-BAPI-TIMESTAMP", ts),
        ("X-BAPI-RECV-WINDOW", BYBIT_RECV_WINDOW.to_string()),
        ("X-BAPI-SIGN", sign),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_matches_rfc4231_vector() {
        let sig = hmac_sha256_hex("Jefe", "what do ya want for nothing?").unwrap();
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn binance_query_is_sorted_and_signed() {
        let query = binance_signed_query(
            "secret",
            &[("symbol", "BTCUSDT".to_string()), ("side", "BUY".to_string())],
            1_700_000_000_000,
        )
        .unwrap();

        let (unsigned, signature) = query.split_once("&signature=").unwrap();
        assert_eq!(unsigned, "side=BUY&symbol=BTCUSDT&timestamp=1700000000000");
        assert_eq!(signature, hmac_sha256_hex("secret", unsigned).unwrap());
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn bybit_headers_sign_prehash_string() {
        let headers = bybit_auth_headers("key", "secret", "accountType=UNIFIED", 1_700_000_000_000).unwrap();
        let expected = hmac_sha256_hex("secret", "1700000000000key5000accountType=UNIFIED").unwrap();

        assert_eq!(headers[0], ("X-BAPI-API-KEY", "key".to_string()));
        assert_eq!(headers[1], ("X-BAPI-TIMESTAMP", "1700000000000".to_string()));
        assert_eq!(headers[2], ("X-BAPI-RECV-WINDOW", "5000".to_string()));
        assert_eq!(headers[3], ("X-BAPI-SIGN", expected));
    }

    #[test]
    fn timestamp_is_recent() {
        assert!(timestamp_ms() > 1_600_000_000_000);
    }
}
