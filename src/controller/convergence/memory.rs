//! # In-memory Cluster Store
//!
//! A [`ClusterStore`] that keeps objects in process. It behaves like the API
//! server where the controller's logic depends on it:
//!
//! - every write bumps a monotonically increasing `resourceVersion`
//! - an update carrying a stale `resourceVersion` fails with a conflict
//! - a replace keeps the stored `status`, a status patch touches nothing else
//! - creates assign a `uid` when none is set
//! - a Secret's `stringData` is folded into `data`
//!
//! Writes are counted so tests can assert "zero writes" properties.

use super::store::{kind_of, ClusterStore, ManagedResource};
use crate::controller::error::ConvergeError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

type ObjectKey = (String, String, String);

#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<ObjectKey, serde_json::Value>>,
    resource_version: AtomicU64,
    writes: AtomicU64,
    pending_conflicts: Mutex<HashSet<String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of create/update/delete/status writes performed through the
    /// [`ClusterStore`] interface. Seeding does not count.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Insert or overwrite an object as an external actor would, bumping its
    /// resource version. Returns the stored object.
    pub fn seed<K: ManagedResource>(&self, obj: K) -> Result<K, ConvergeError> {
        let namespace = obj.meta().namespace.clone().unwrap_or_default();
        let name = obj.meta().name.clone().unwrap_or_default();
        let mut value = Self::normalize::<K>(serde_json::to_value(&obj)?)?;
        self.stamp(&mut value, &namespace, true);
        self.lock_objects()?
            .insert((kind_of::<K>(), namespace, name), value.clone());
        Ok(serde_json::from_value(value)?)
    }

    /// Read an object without going through the async interface
    pub fn peek<K: ManagedResource>(&self, namespace: &str, name: &str) -> Option<K> {
        let objects = self.objects.lock().ok()?;
        objects
            .get(&(kind_of::<K>(), namespace.to_string(), name.to_string()))
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Make the next update of kind `K` fail with a conflict, as if another
    /// writer got there first
    pub fn fail_next_update<K: ManagedResource>(&self) {
        if let Ok(mut pending) = self.pending_conflicts.lock() {
            pending.insert(kind_of::<K>());
        }
    }

    fn lock_objects(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<ObjectKey, serde_json::Value>>, ConvergeError>
    {
        self.objects
            .lock()
            .map_err(|e| ConvergeError::Malformed(format!("memory store poisoned: {e}")))
    }

    fn next_resource_version(&self) -> String {
        (self.resource_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn stamp(&self, value: &mut serde_json::Value, namespace: &str, assign_uid: bool) {
        let resource_version = self.next_resource_version();
        let Some(object) = value.as_object_mut() else {
            return;
        };
        let metadata = object
            .entry("metadata")
            .or_insert_with(|| serde_json::json!({}));
        if let Some(metadata) = metadata.as_object_mut() {
            metadata.insert("namespace".into(), namespace.into());
            metadata.insert("resourceVersion".into(), resource_version.clone().into());
            if assign_uid && !metadata.contains_key("uid") {
                metadata.insert("uid".into(), format!("uid-{resource_version}").into());
            }
        }
    }

    /// Fold `stringData` into `data` the way the API server does for Secrets
    fn normalize<K: ManagedResource>(value: serde_json::Value) -> Result<serde_json::Value, ConvergeError> {
        if kind_of::<K>() != "Secret" {
            return Ok(value);
        }
        let mut secret: Secret = serde_json::from_value(value)?;
        if let Some(string_data) = secret.string_data.take() {
            let data = secret.data.get_or_insert_with(BTreeMap::new);
            for (key, text) in string_data {
                data.insert(key, ByteString(text.into_bytes()));
            }
        }
        Ok(serde_json::to_value(secret)?)
    }

    fn count_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

fn resource_version_of(value: &serde_json::Value) -> Option<&str> {
    value
        .get("metadata")
        .and_then(|m| m.get("resourceVersion"))
        .and_then(serde_json::Value::as_str)
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn get<K: ManagedResource>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, ConvergeError> {
        let objects = self.lock_objects()?;
        match objects.get(&(kind_of::<K>(), namespace.to_string(), name.to_string())) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    async fn create<K: ManagedResource>(
        &self,
        namespace: &str,
        obj: &K,
    ) -> Result<K, ConvergeError> {
        let kind = kind_of::<K>();
        let name = obj
            .meta()
            .name
            .clone()
            .ok_or_else(|| ConvergeError::Malformed(format!("{kind} without a name")))?;
        let mut value = Self::normalize::<K>(serde_json::to_value(obj)?)?;
        let mut objects = self.lock_objects()?;
        let key = (kind.clone(), namespace.to_string(), name.clone());
        if objects.contains_key(&key) {
            return Err(ConvergeError::Conflict {
                kind,
                name,
                message: "already exists".to_string(),
            });
        }
        self.stamp(&mut value, namespace, true);
        objects.insert(key, value.clone());
        self.count_write();
        Ok(serde_json::from_value(value)?)
    }

    async fn update<K: ManagedResource>(
        &self,
        namespace: &str,
        obj: &K,
    ) -> Result<K, ConvergeError> {
        let kind = kind_of::<K>();
        let name = obj.meta().name.clone().unwrap_or_default();
        let mut value = Self::normalize::<K>(serde_json::to_value(obj)?)?;
        let mut objects = self.lock_objects()?;
        let key = (kind.clone(), namespace.to_string(), name.clone());
        let Some(stored) = objects.get(&key) else {
            return Err(ConvergeError::NotFound { kind, name });
        };

        let injected = self
            .pending_conflicts
            .lock()
            .map(|mut pending| pending.remove(&kind))
            .unwrap_or(false);
        let sent = obj.meta().resource_version.as_deref();
        if injected || (sent.is_some() && sent != resource_version_of(stored)) {
            return Err(ConvergeError::Conflict {
                kind,
                name,
                message: "the object has been modified".to_string(),
            });
        }

        if let (Some(status), Some(object)) = (stored.get("status").cloned(), value.as_object_mut())
        {
            object.insert("status".into(), status);
        }
        self.stamp(&mut value, namespace, false);
        objects.insert(key, value.clone());
        self.count_write();
        Ok(serde_json::from_value(value)?)
    }

    async fn delete<K: ManagedResource>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ConvergeError> {
        let kind = kind_of::<K>();
        let mut objects = self.lock_objects()?;
        match objects.remove(&(kind.clone(), namespace.to_string(), name.to_string())) {
            Some(_) => {
                self.count_write();
                Ok(())
            }
            None => Err(ConvergeError::NotFound {
                kind,
                name: name.to_string(),
            }),
        }
    }

    async fn patch_status<K: ManagedResource>(
        &self,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<(), ConvergeError> {
        let kind = kind_of::<K>();
        let mut objects = self.lock_objects()?;
        let key = (kind.clone(), namespace.to_string(), name.to_string());
        let Some(stored) = objects.get_mut(&key) else {
            return Err(ConvergeError::NotFound {
                kind,
                name: name.to_string(),
            });
        };
        if let Some(object) = stored.as_object_mut() {
            object.insert("status".into(), status);
        }
        let mut value = stored.clone();
        self.stamp(&mut value, namespace, false);
        objects.insert(key, value);
        self.count_write();
        Ok(())
    }
}
