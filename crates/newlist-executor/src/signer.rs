//! Request signing for the exchange trading API.
//!
//! Signed endpoints take the canonical query string plus
//! `timestamp`, optional `recvWindow`, and a hex HMAC-SHA256 `signature`
//! over everything before it. The API key travels in `X-MBX-APIKEY`.

use std::fmt;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{ExecutorError, ExecutorResult};

type HmacSha256 = Hmac<Sha256>;

/// Millisecond clock used for the `timestamp` parameter.
pub type TimestampFn = Arc<dyn Fn() -> i64 + Send + Sync>;

/// API key pair. The secret is wiped from memory on drop.
#[derive(Clone)]
pub struct ApiCredentials {
    api_key: String,
    api_secret: Zeroizing<String>,
}

impl ApiCredentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: Zeroizing::new(api_secret.into()),
        }
    }

    /// Load from environment variables.
    ///
    /// # Errors
    /// `ExecutorError::Credentials` if either variable is missing or empty.
    pub fn from_env(key_var: &str, secret_var: &str) -> ExecutorResult<Self> {
        let api_key = read_env(key_var)?;
        let api_secret = Zeroizing::new(read_env(secret_var)?);
        Ok(Self {
            api_key,
            api_secret,
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub(crate) fn api_secret(&self) -> &str {
        &self.api_secret
    }
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

fn read_env(var: &str) -> ExecutorResult<String> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ExecutorError::Credentials(format!(
            "environment variable {var} not set"
        ))),
    }
}

/// Builds signed query strings.
#[derive(Clone)]
pub struct RequestSigner {
    credentials: ApiCredentials,
    recv_window_ms: Option<u64>,
    timestamp_fn: TimestampFn,
}

impl RequestSigner {
    pub fn new(credentials: ApiCredentials, recv_window_ms: Option<u64>) -> Self {
        Self {
            credentials,
            recv_window_ms,
            timestamp_fn: Arc::new(|| chrono::Utc::now().timestamp_millis()),
        }
    }

    /// Replace the clock (tests pin the timestamp).
    pub fn with_timestamp_fn(mut self, timestamp_fn: TimestampFn) -> Self {
        self.timestamp_fn = timestamp_fn;
        self
    }

    pub fn api_key(&self) -> &str {
        self.credentials.api_key()
    }

    /// Append `timestamp` and `recvWindow`, sort, and sign.
    ///
    /// Returns `"{canonical}&signature={hex}"`.
    pub fn signed_query(&self, mut params: Vec<(String, String)>) -> ExecutorResult<String> {
        params.push(("timestamp".to_string(), (self.timestamp_fn)().to_string()));
        if let Some(recv_window) = self.recv_window_ms {
            params.push(("recvWindow".to_string(), recv_window.to_string()));
        }
        params.sort_by(|a, b| a.0.cmp(&b.0));
        let canonical = canonical_query(&params);
        let signature = sign_query(self.credentials.api_secret(), &canonical)?;
        Ok(format!("{canonical}&signature={signature}"))
    }
}

/// `k=v&k=v` with RFC 3986 unreserved characters left as is.
pub fn canonical_query(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        let c = byte as char;
        if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~') {
            out.push(c);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Hex HMAC-SHA256 of `query` keyed by `secret`.
pub fn sign_query(secret: &str, query: &str) -> ExecutorResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ExecutorError::Credentials(format!("invalid signing key: {e}")))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_signing_matches_known_vector() {
        let query = "price=100&quantity=0.1&recvWindow=5000&side=BUY&symbol=BTCUSDT&timeInForce=GTC&timestamp=1700000000000&type=LIMIT";
        let signature = sign_query("testsecret", query).unwrap();
        assert_eq!(
            signature,
            "7ce35481df1c771813dfdf305ecf8a94804816bdc818eeb0404e79a58c887f66"
        );
    }

    #[test]
    fn test_signed_query_sorts_and_appends() {
        let signer = RequestSigner::new(ApiCredentials::new("key", "testsecret"), Some(5000))
            .with_timestamp_fn(Arc::new(|| 1_700_000_000_000));

        let query = signer
            .signed_query(params(&[
                ("type", "LIMIT"),
                ("symbol", "BTCUSDT"),
                ("side", "BUY"),
                ("timeInForce", "GTC"),
                ("quantity", "0.1"),
                ("price", "100"),
            ]))
            .unwrap();

        assert_eq!(
            query,
            "price=100&quantity=0.1&recvWindow=5000&side=BUY&symbol=BTCUSDT&timeInForce=GTC&timestamp=1700000000000&type=LIMIT&signature=7ce35481df1c771813dfdf305ecf8a94804816bdc818eeb0404e79a58c887f66"
        );
    }

    #[test]
    fn test_encode_reserved_characters() {
        let query = canonical_query(&params(&[("newClientOrderId", "a b/c")]));
        assert_eq!(query, "newClientOrderId=a%20b%2Fc");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = ApiCredentials::new("my-key", "super-secret");
        let debug = format!("{creds:?}");
        assert!(debug.contains("my-key"));
        assert!(!debug.contains("super-secret"));
    }

    #[test]
    fn test_from_env_missing() {
        let err = ApiCredentials::from_env("NEWLIST_TEST_MISSING_KEY", "NEWLIST_TEST_MISSING_SECRET")
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Credentials(_)));
    }
}
