// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Value codecs.
//!
//! A codec maps structured values to the byte payloads both tiers store.
//! Codecs are resolved by name at construction time; an unknown name is a
//! configuration error, never a runtime surprise. Raw byte payloads written
//! through [`Cache::set_raw`](crate::Cache::set_raw) bypass the codec
//! entirely.

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::Error;

/// A named value codec.
///
/// The default is [`Codec::MsgPack`]; `"json"` resolves to [`Codec::Json`].
///
/// # Examples
///
/// ```
/// use duocache::Codec;
///
/// assert_eq!(Codec::resolve("msgpack"), Some(Codec::MsgPack));
/// assert_eq!(Codec::resolve("json"), Some(Codec::Json));
/// assert_eq!(Codec::resolve("protobuf"), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// MessagePack via `rmp-serde`. Compact; the default.
    MsgPack,
    /// JSON via `serde_json`. Readable; useful when payloads are shared
    /// with non-Rust consumers.
    Json,
}

impl Default for Codec {
    fn default() -> Self {
        Self::MsgPack
    }
}

impl Codec {
    /// Resolves a codec by its registered name.
    #[must_use]
    pub fn resolve(name: &str) -> Option<Self> {
        match name {
            "msgpack" => Some(Self::MsgPack),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    /// Returns the codec's registered name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::MsgPack => "msgpack",
            Self::Json => "json",
        }
    }

    /// Encodes a value into a byte payload.
    pub fn encode<T: Serialize>(self, value: &T) -> Result<Bytes, Error> {
        match self {
            Self::MsgPack => rmp_serde::to_vec_named(value).map(Bytes::from).map_err(Error::codec),
            Self::Json => serde_json::to_vec(value).map(Bytes::from).map_err(Error::codec),
        }
    }

    /// Decodes a byte payload into a value.
    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T, Error> {
        match self {
            Self::MsgPack => rmp_serde::from_slice(bytes).map_err(Error::codec),
            Self::Json => serde_json::from_slice(bytes).map_err(Error::codec),
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: u64,
        name: String,
        tags: Vec<String>,
    }

    fn sample() -> Sample {
        Sample {
            id: 7,
            name: "seven".to_owned(),
            tags: vec!["a".to_owned(), "b".to_owned()],
        }
    }

    #[test]
    fn msgpack_roundtrip() {
        let encoded = Codec::MsgPack.encode(&sample()).unwrap();
        let decoded: Sample = Codec::MsgPack.decode(&encoded).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn json_roundtrip() {
        let encoded = Codec::Json.encode(&sample()).unwrap();
        let decoded: Sample = Codec::Json.decode(&encoded).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn decode_rejects_foreign_payload() {
        let encoded = Codec::Json.encode(&sample()).unwrap();
        assert!(Codec::MsgPack.decode::<Sample>(&encoded).is_err());
    }

    #[test]
    fn resolve_is_exact() {
        assert_eq!(Codec::resolve("msgpack"), Some(Codec::MsgPack));
        assert_eq!(Codec::resolve("json"), Some(Codec::Json));
        assert_eq!(Codec::resolve("MsgPack"), None);
        assert_eq!(Codec::resolve(""), None);
    }

    #[test]
    fn default_is_msgpack() {
        assert_eq!(Codec::default(), Codec::MsgPack);
        assert_eq!(Codec::default().name(), "msgpack");
    }
}
