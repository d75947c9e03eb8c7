//! JSON Codec using `serde_json`

use crate::traits::CacheCodec;
use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// JSON Codec using `serde_json`
///
/// The default codec for typed fetches. Payloads stay human-readable in the
/// backing store, which helps when inspecting Redis or Memcached by hand.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl CacheCodec for JsonCodec {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn name(&self) -> &'static str {
        "serde_json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Quote {
        symbol: String,
        price_cents: u64,
    }

    #[test]
    fn encodes_as_plain_json() {
        let quote = Quote { symbol: "ACME".into(), price_cents: 1250 };
        let bytes = JsonCodec.serialize(&quote).unwrap_or_default();
        assert_eq!(bytes, br#"{"symbol":"ACME","price_cents":1250}"#);
    }

    #[test]
    fn rejects_payload_of_the_wrong_shape() {
        let decoded: Result<Quote> = JsonCodec.deserialize(b"[1,2,3]");
        assert!(decoded.is_err());
    }
}
