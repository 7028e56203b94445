//! ObjectStore port - blob storage for compiled component scripts.
//!
//! Keys are deterministic (`custom-components/{job_id}.js`), so writing the
//! same job twice overwrites instead of leaking objects.

use async_trait::async_trait;

use crate::domain::StoreError;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key` and return the public address of the object.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, StoreError>;

    /// Read an object back, `None` if the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
}
