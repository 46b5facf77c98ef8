use std::any::type_name;
use std::marker::PhantomData;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::dedup::DedupCache;
use super::error::CacheError;

/// Key of a typed cache entry: the value's type name plus a caller key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectKey<T> {
    key: String,
    _type: PhantomData<fn() -> T>,
}

impl<T> ObjectKey<T> {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            _type: PhantomData,
        }
    }

    pub fn type_name(&self) -> &'static str {
        type_name::<T>()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Flat key in the backing cache. The type name is length-prefixed so no
    /// (type, key) pair can collide with another.
    pub fn storage_key(&self) -> String {
        let ty = self.type_name();
        format!("obj:{}:{}:{}", ty.len(), ty, self.key)
    }
}

/// Typed object cache over any [`DedupCache`].
///
/// Values are encoded with bitcode and stored as base64 text.
///
/// ```
/// use reliable_mq::cache::{InMemoryDedupCache, ObjectCache};
///
/// let objects = ObjectCache::new(InMemoryDedupCache::new());
/// objects.put("user-1", &vec![1u32, 2, 3], None).unwrap();
/// assert_eq!(objects.get::<Vec<u32>>("user-1").unwrap(), Some(vec![1, 2, 3]));
/// assert_eq!(objects.get::<String>("user-1").unwrap(), None);
/// ```
#[derive(Clone)]
pub struct ObjectCache<C> {
    cache: C,
}

impl<C: DedupCache> ObjectCache<C> {
    pub fn new(cache: C) -> Self {
        Self { cache }
    }

    pub fn inner(&self) -> &C {
        &self.cache
    }

    pub fn put<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<(), CacheError> {
        let bytes = bitcode::serialize(value).map_err(|e| CacheError::Codec(e.to_string()))?;
        self.cache
            .set(&ObjectKey::<T>::new(key).storage_key(), &STANDARD.encode(bytes), ttl)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let Some(text) = self.cache.get(&ObjectKey::<T>::new(key).storage_key())? else {
            return Ok(None);
        };
        let bytes = STANDARD
            .decode(text.as_bytes())
            .map_err(|e| CacheError::Codec(e.to_string()))?;
        bitcode::deserialize(&bytes)
            .map(Some)
            .map_err(|e| CacheError::Codec(e.to_string()))
    }

    pub fn remove<T>(&self, key: &str) -> Result<bool, CacheError> {
        self.cache.delete(&ObjectKey::<T>::new(key).storage_key())
    }
}
