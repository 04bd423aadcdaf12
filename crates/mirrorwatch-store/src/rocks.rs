//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::path::Path;
use std::sync::Arc;

use mirrorwatch_core::EndpointHash;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::types::{Endpoint, EndpointState};
use crate::Store;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::MissingColumnFamily(name.to_string()))
    }

    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Encode(e.to_string()))?;
        Ok(buf)
    }

    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Decode(e.to_string()))
    }

    /// Stage the record and index writes for one endpoint.
    fn stage_put(&self, batch: &mut WriteBatch, endpoint: &Endpoint) -> Result<()> {
        let cf_endpoints = self.cf(cf::ENDPOINTS)?;
        let cf_by_state = self.cf(cf::ENDPOINTS_BY_STATE)?;

        let key = keys::endpoint_key(&endpoint.hash);
        let value = Self::serialize(endpoint)?;

        let old_state = self
            .db
            .get_cf(&cf_endpoints, &key)?
            .map(|data| Self::deserialize::<Endpoint>(&data))
            .transpose()?
            .map(|e| e.state);

        batch.put_cf(&cf_endpoints, &key, &value);

        if let Some(old) = old_state {
            if old != endpoint.state {
                batch.delete_cf(
                    &cf_by_state,
                    keys::state_endpoint_key(old.as_u8(), &endpoint.hash),
                );
            }
        }
        batch.put_cf(
            &cf_by_state,
            keys::state_endpoint_key(endpoint.state.as_u8(), &endpoint.hash),
            [],
        );

        Ok(())
    }
}

impl Store for RocksStore {
    fn put_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        self.put_endpoints(std::slice::from_ref(endpoint))
    }

    fn put_endpoints(&self, endpoints: &[Endpoint]) -> Result<()> {
        let mut batch = WriteBatch::default();
        for endpoint in endpoints {
            self.stage_put(&mut batch, endpoint)?;
        }

        self.db.write(batch)?;

        tracing::trace!(count = endpoints.len(), "Persisted endpoints");
        Ok(())
    }

    fn get_endpoint(&self, hash: &EndpointHash) -> Result<Option<Endpoint>> {
        let cf = self.cf(cf::ENDPOINTS)?;

        self.db
            .get_cf(&cf, keys::endpoint_key(hash))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn delete_endpoint(&self, hash: &EndpointHash) -> Result<()> {
        let cf_endpoints = self.cf(cf::ENDPOINTS)?;
        let cf_by_state = self.cf(cf::ENDPOINTS_BY_STATE)?;

        let endpoint = self
            .get_endpoint(hash)?
            .ok_or(StoreError::EndpointNotFound(*hash))?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_endpoints, keys::endpoint_key(hash));
        batch.delete_cf(
            &cf_by_state,
            keys::state_endpoint_key(endpoint.state.as_u8(), hash),
        );

        self.db.write(batch)?;

        Ok(())
    }

    fn list_endpoints_by_state(&self, state: EndpointState) -> Result<Vec<Endpoint>> {
        let cf_by_state = self.cf(cf::ENDPOINTS_BY_STATE)?;
        let prefix = keys::state_prefix(state.as_u8());

        let mut endpoints = Vec::new();
        let iter = self.db.iterator_cf(
            &cf_by_state,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        for item in iter {
            let (key, _) = item?;

            if !key.starts_with(&prefix) {
                break;
            }

            let Some(hash) = keys::extract_hash_from_state_key(&key) else {
                tracing::warn!(state = %state, "Skipping malformed state index key");
                continue;
            };
            if let Some(endpoint) = self.get_endpoint(&hash)? {
                endpoints.push(endpoint);
            }
        }

        Ok(endpoints)
    }

    fn list_all_endpoints(&self) -> Result<Vec<Endpoint>> {
        let cf = self.cf(cf::ENDPOINTS)?;

        let mut endpoints = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            endpoints.push(Self::deserialize(&value)?);
        }

        Ok(endpoints)
    }
}
