//! Bincode Codec using `bincode`

use crate::traits::CacheCodec;
use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Compact binary codec using `bincode`
///
/// Not self-describing: readers and writers must agree on the exact type.
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeCodec;

impl CacheCodec for BincodeCodec {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(bincode::serialize(value)?)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(bincode::deserialize(bytes)?)
    }

    fn name(&self) -> &'static str {
        "bincode"
    }
}
