//! Cache Codec Implementations
//!
//! Built-in implementations of the [`CacheCodec`](crate::traits::CacheCodec) trait.
//! The tiers and the fetch layer move opaque bytes; codecs are only used by the
//! typed helpers such as [`StampedeCache::fetch_typed`](crate::StampedeCache::fetch_typed).

mod json;
pub use json::JsonCodec;

#[cfg(feature = "bincode")]
mod bincode;
#[cfg(feature = "bincode")]
#[cfg_attr(docsrs, doc(cfg(feature = "bincode")))]
pub use self::bincode::BincodeCodec;

#[cfg(feature = "msgpack")]
mod msgpack;
#[cfg(feature = "msgpack")]
#[cfg_attr(docsrs, doc(cfg(feature = "msgpack")))]
pub use msgpack::MsgPackCodec;
