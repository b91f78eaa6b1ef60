//! # Codecs
//!
//! A [`Codec`] turns payloads into record bytes and back. The harness ships
//! [`StringCodec`] (the default for text), [`RawCodec`] and [`JsonCodec`];
//! callers can implement [`Codec`] for anything else and register it in a
//! [`CodecRegistry`] keyed by payload type.
use std::{
    any::{Any, TypeId, type_name},
    collections::HashMap,
    fmt,
    marker::PhantomData,
    string::FromUtf8Error,
    sync::Arc,
};

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// A payload could not be converted
#[derive(Debug, Error)]
pub enum CodecError {
    /// record is not valid UTF-8
    #[error("payload is not utf-8: {0}")]
    Utf8(#[from] FromUtf8Error),

    /// JSON (de)serialization failed
    #[error("json codec: {0}")]
    Json(#[from] serde_json::Error),

    /// no codec is registered for the payload type
    #[error("no codec registered for {0}")]
    Unregistered(&'static str),

    /// failure reported by a caller supplied codec
    #[error("{0}")]
    Custom(String),
}

/// Serializer and deserializer for payloads of type `T`
pub trait Codec<T>: Send + Sync {
    /// payload to record bytes
    fn serialize(&self, value: &T) -> Result<Bytes, CodecError>;
    /// record bytes to payload
    fn deserialize(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

impl<T, C: Codec<T> + ?Sized> Codec<T> for Arc<C> {
    fn serialize(&self, value: &T) -> Result<Bytes, CodecError> {
        (**self).serialize(value)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T, CodecError> {
        (**self).deserialize(bytes)
    }
}

impl<T, C: Codec<T> + ?Sized> Codec<T> for &C {
    fn serialize(&self, value: &T) -> Result<Bytes, CodecError> {
        (**self).serialize(value)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T, CodecError> {
        (**self).deserialize(bytes)
    }
}

/// UTF-8 text
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StringCodec;

impl Codec<String> for StringCodec {
    fn serialize(&self, value: &String) -> Result<Bytes, CodecError> {
        Ok(Bytes::copy_from_slice(value.as_bytes()))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<String, CodecError> {
        Ok(String::from_utf8(bytes.to_vec())?)
    }
}

/// bytes as they are
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RawCodec;

impl Codec<Vec<u8>> for RawCodec {
    fn serialize(&self, value: &Vec<u8>) -> Result<Bytes, CodecError> {
        Ok(Bytes::copy_from_slice(value))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(bytes.to_vec())
    }
}

impl Codec<Bytes> for RawCodec {
    fn serialize(&self, value: &Bytes) -> Result<Bytes, CodecError> {
        Ok(value.clone())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Bytes, CodecError> {
        Ok(Bytes::copy_from_slice(bytes))
    }
}

/// Any serde type, as JSON
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    /// create a new codec
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonCodec")
            .field("type", &type_name::<T>())
            .finish()
    }
}

impl<T: Serialize + DeserializeOwned> Codec<T> for JsonCodec<T> {
    fn serialize(&self, value: &T) -> Result<Bytes, CodecError> {
        Ok(serde_json::to_vec(value)?.into())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Codecs keyed by payload type.
///
/// A new registry knows `String` ([`StringCodec`]) plus `Vec<u8>` and
/// [`Bytes`] ([`RawCodec`]). Registering a type again replaces its codec.
pub struct CodecRegistry {
    // every value is an `Arc<dyn Codec<T>>` for the `T` of its key
    codecs: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("codecs", &self.codecs.read().len())
            .finish()
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let registry = Self::empty();
        registry.register::<String, _>(StringCodec);
        registry.register::<Vec<u8>, _>(RawCodec);
        registry.register::<Bytes, _>(RawCodec);
        registry
    }
}

impl CodecRegistry {
    /// a registry without any codecs
    pub fn empty() -> Self {
        Self {
            codecs: RwLock::new(HashMap::new()),
        }
    }

    /// Use `codec` for payloads of type `T`
    pub fn register<T, C>(&self, codec: C)
    where
        T: 'static,
        C: Codec<T> + 'static,
    {
        let codec: Arc<dyn Codec<T>> = Arc::new(codec);
        self.codecs
            .write()
            .insert(TypeId::of::<T>(), Box::new(codec));
    }

    /// codec registered for `T`
    pub fn get<T: 'static>(&self) -> Result<Arc<dyn Codec<T>>, CodecError> {
        self.codecs
            .read()
            .get(&TypeId::of::<T>())
            .and_then(|codec| codec.downcast_ref::<Arc<dyn Codec<T>>>())
            .cloned()
            .ok_or(CodecError::Unregistered(type_name::<T>()))
    }

    /// true if a codec is registered for `T`
    pub fn contains<T: 'static>(&self) -> bool {
        self.codecs.read().contains_key(&TypeId::of::<T>())
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Reading {
        sensor: String,
        value: f64,
    }

    #[test]
    fn test_string_codec() -> Result<(), CodecError> {
        let bytes = StringCodec.serialize(&"message1".to_owned())?;
        assert_eq!(&bytes[..], b"message1");
        assert!(matches!(
            StringCodec.deserialize(&[0xff, 0xfe]),
            Err(CodecError::Utf8(_))
        ));
        Ok(())
    }

    #[test]
    fn test_json_codec() -> Result<(), CodecError> {
        let codec = JsonCodec::<Reading>::new();
        let reading = Reading {
            sensor: "t1".into(),
            value: 21.5,
        };
        let bytes = codec.serialize(&reading)?;
        assert_eq!(&bytes[..], br#"{"sensor":"t1","value":21.5}"#);
        assert_eq!(codec.deserialize(&bytes)?, reading);
        assert!(matches!(codec.deserialize(b"{"), Err(CodecError::Json(_))));
        Ok(())
    }

    #[test]
    fn test_registry() -> Result<(), CodecError> {
        let registry = CodecRegistry::default();
        assert!(registry.contains::<String>());
        assert!(registry.contains::<Vec<u8>>());
        assert!(matches!(
            registry.get::<Reading>(),
            Err(CodecError::Unregistered(_))
        ));

        registry.register::<Reading, _>(JsonCodec::<Reading>::new());
        let codec = registry.get::<Reading>()?;
        let bytes = codec.serialize(&Reading {
            sensor: "t2".into(),
            value: 1.0,
        })?;
        assert_eq!(codec.deserialize(&bytes)?.sensor, "t2");

        let text = registry.get::<String>()?;
        assert_eq!(text.deserialize(b"hi")?, "hi");
        Ok(())
    }
}
