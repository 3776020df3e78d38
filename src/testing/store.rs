//! In-memory [`ObjectStore`].

use crate::constants::{DEFAULT_RESYNC_PERIOD_SECS, DEFAULT_SYSTEM_NAMESPACE};
use crate::controller::client::{
    apply_merge_patch, from_dynamic, status_patch, to_dynamic, Client, Object, ObjectKey, ObjectStore,
};
use crate::controller::error::{Error, Result};
use crate::controller::reconciler::ReconcileContext;
use crate::controller::tracker::Tracker;
use crate::testing::FakeRecorder;
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{ApiResource, DynamicObject};
use kube::ResourceExt;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A call made against the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub verb: String,
    pub kind: String,
    pub namespace: Option<String>,
    /// Object name, the generateName prefix for generated creates, empty for lists
    pub name: String,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, DynamicObject>,
    actions: Vec<Action>,
    failures: Vec<(String, String)>,
    generated: HashMap<String, u32>,
    resource_version: u64,
}

impl State {
    fn record(&mut self, verb: &str, ar: &ApiResource, namespace: Option<&str>, name: &str) -> Result<()> {
        self.actions.push(Action {
            verb: verb.to_string(),
            kind: ar.kind.clone(),
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        });
        if self
            .failures
            .iter()
            .any(|(v, k)| v == verb && *k == ar.kind)
        {
            return Err(Error::Other(anyhow!("inducing failure for {} {}", verb, ar.kind)));
        }
        Ok(())
    }

    fn next_resource_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    /// Fill in the fields the API server assigns on create
    fn admit(&mut self, obj: &mut DynamicObject) {
        let meta = &mut obj.metadata;
        if meta.uid.is_none() {
            meta.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        if meta.creation_timestamp.is_none() {
            meta.creation_timestamp = time(&Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
        }
        meta.resource_version = Some(self.next_resource_version());
    }

    fn lookup(&self, key: &ObjectKey) -> Result<&DynamicObject> {
        self.objects.get(key).ok_or_else(|| Error::NotFound {
            kind: key.kind.clone(),
            namespace: key.namespace.clone().unwrap_or_default(),
            name: key.name.clone(),
        })
    }

    fn check_version(&self, key: &ObjectKey, obj: &DynamicObject) -> Result<()> {
        let stored = self.lookup(key)?;
        match &obj.metadata.resource_version {
            Some(version) if Some(version) != stored.metadata.resource_version.as_ref() => Err(Error::Conflict {
                kind: key.kind.clone(),
                name: key.name.clone(),
            }),
            _ => Ok(()),
        }
    }
}

/// Parse an RFC3339 timestamp into an apimachinery `Time`
pub(crate) fn time(rfc3339: &str) -> Option<Time> {
    serde_json::from_value(Value::String(rfc3339.to_string())).ok()
}

fn key(ar: &ApiResource, namespace: Option<&str>, name: &str) -> ObjectKey {
    ObjectKey {
        group: ar.group.clone(),
        kind: ar.kind.clone(),
        namespace: namespace.map(str::to_string),
        name: name.to_string(),
    }
}

fn dynamic_key(obj: &DynamicObject) -> Option<ObjectKey> {
    let types = obj.types.as_ref()?;
    let (group, _) = types
        .api_version
        .rsplit_once('/')
        .unwrap_or(("", types.api_version.as_str()));
    Some(ObjectKey {
        group: group.to_string(),
        kind: types.kind.clone(),
        namespace: obj.metadata.namespace.clone(),
        name: obj.name_any(),
    })
}

fn status_of(obj: &DynamicObject) -> Option<Value> {
    obj.data.get("status").cloned()
}

fn set_status(obj: &mut DynamicObject, status: Option<Value>) {
    if let Some(map) = obj.data.as_object_mut() {
        match status {
            Some(status) => {
                map.insert("status".to_string(), status);
            }
            None => {
                map.remove("status");
            }
        }
    }
}

/// Objects held in memory, shared between clones
///
/// Behaves like the API server where reconcilers can tell the difference:
/// creates assign uid, resourceVersion, creationTimestamp and generated
/// names; updates ignore status and reject stale resourceVersions; status
/// writes merge-patch only status. Every call is recorded as an [`Action`].
#[derive(Clone, Default)]
pub struct FakeStore {
    state: Arc<Mutex<State>>,
}

impl fmt::Debug for FakeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("FakeStore")
            .field("objects", &state.objects.keys().collect::<Vec<_>>())
            .field("actions", &state.actions.len())
            .finish()
    }
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an object without recording an action, as the API server would
    /// have stored it
    pub fn seed<K: Object>(&self, obj: &K) -> K {
        let Ok(mut dynamic) = to_dynamic(obj) else {
            return obj.clone();
        };
        let mut state = self.lock();
        state.admit(&mut dynamic);
        if let Some(key) = dynamic_key(&dynamic) {
            state.objects.insert(key, dynamic.clone());
        }
        from_dynamic(dynamic).unwrap_or_else(|_| obj.clone())
    }

    /// Overwrite a stored object, status included
    pub fn replace<K: Object>(&self, obj: &K) {
        let Ok(mut dynamic) = to_dynamic(obj) else {
            return;
        };
        let mut state = self.lock();
        dynamic.metadata.resource_version = Some(state.next_resource_version());
        if let Some(key) = dynamic_key(&dynamic) {
            state.objects.insert(key, dynamic);
        }
    }

    pub fn remove(&self, key: &ObjectKey) {
        self.lock().objects.remove(key);
    }

    pub fn get_typed<K: Object>(&self, namespace: Option<&str>, name: &str) -> Option<K> {
        let key = ObjectKey::of::<K>(namespace, name);
        let obj = self.lock().objects.get(&key).cloned()?;
        from_dynamic(obj).ok()
    }

    pub fn list_typed<K: Object>(&self, namespace: Option<&str>) -> Vec<K> {
        let state = self.lock();
        state
            .objects
            .iter()
            .filter(|(key, _)| key.is_kind::<K>() && (namespace.is_none() || key.namespace.as_deref() == namespace))
            .filter_map(|(_, obj)| from_dynamic(obj.clone()).ok())
            .collect()
    }

    /// Fail every later call with this verb on this kind
    pub fn fail_on(&self, verb: &str, kind: &str) {
        self.lock()
            .failures
            .push((verb.to_string(), kind.to_string()));
    }

    pub fn actions(&self) -> Vec<Action> {
        self.lock().actions.clone()
    }

    pub fn client(&self) -> Client {
        Client::new(Arc::new(self.clone()))
    }

    /// Context over this store with a fresh tracker and the default system namespace
    pub fn context(&self, recorder: &FakeRecorder) -> ReconcileContext {
        ReconcileContext::new(
            self.client(),
            Arc::new(Tracker::new(Duration::from_secs(DEFAULT_RESYNC_PERIOD_SECS))),
            Arc::new(recorder.clone()),
            DEFAULT_SYSTEM_NAMESPACE,
        )
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn get(&self, ar: &ApiResource, namespace: Option<&str>, name: &str) -> Result<DynamicObject> {
        let mut state = self.lock();
        state.record("get", ar, namespace, name)?;
        state.lookup(&key(ar, namespace, name)).cloned()
    }

    async fn list(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>> {
        let mut state = self.lock();
        state.record("list", ar, namespace, "")?;
        Ok(state
            .objects
            .iter()
            .filter(|(key, _)| key.group == ar.group && key.kind == ar.kind)
            .filter(|(key, _)| namespace.is_none() || key.namespace.as_deref() == namespace)
            .filter(|(_, obj)| {
                let actual = obj.labels();
                labels.iter().all(|(k, v)| actual.get(k) == Some(v))
            })
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let namespace = obj.metadata.namespace.as_deref();
        let mut state = self.lock();
        let requested = obj
            .metadata
            .name
            .clone()
            .or_else(|| obj.metadata.generate_name.clone())
            .unwrap_or_default();
        state.record("create", ar, namespace, &requested)?;

        let mut created = obj.clone();
        if created.metadata.name.is_none() {
            let prefix = created.metadata.generate_name.clone().unwrap_or_default();
            let counter = state.generated.entry(prefix.clone()).or_insert(0);
            *counter += 1;
            created.metadata.name = Some(format!("{prefix}{counter:03}"));
        }
        let key = key(ar, namespace, &created.name_any());
        if state.objects.contains_key(&key) {
            return Err(Error::AlreadyExists {
                kind: ar.kind.clone(),
                name: key.name,
            });
        }
        created.metadata.uid = None;
        created.metadata.creation_timestamp = None;
        state.admit(&mut created);
        state.objects.insert(key, created.clone());
        Ok(created)
    }

    async fn update(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let namespace = obj.metadata.namespace.as_deref();
        let name = obj.name_any();
        let mut state = self.lock();
        state.record("update", ar, namespace, &name)?;
        let key = key(ar, namespace, &name);
        state.check_version(&key, obj)?;

        let stored = state.lookup(&key)?.clone();
        let mut updated = obj.clone();
        set_status(&mut updated, status_of(&stored));
        updated.metadata.uid = stored.metadata.uid;
        updated.metadata.creation_timestamp = stored.metadata.creation_timestamp;
        updated.metadata.resource_version = Some(state.next_resource_version());
        state.objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn update_status(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let namespace = obj.metadata.namespace.as_deref();
        let name = obj.name_any();
        let mut state = self.lock();
        state.record("update_status", ar, namespace, &name)?;
        let key = key(ar, namespace, &name);
        state.check_version(&key, obj)?;

        let mut updated = state.lookup(&key)?.clone();
        let mut status = status_of(&updated).unwrap_or(Value::Null);
        apply_merge_patch(&mut status, &status_patch(obj)["status"]);
        set_status(&mut updated, (!status.is_null()).then_some(status));
        updated.metadata.resource_version = Some(state.next_resource_version());
        state.objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, ar: &ApiResource, namespace: Option<&str>, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.record("delete", ar, namespace, name)?;
        let key = key(ar, namespace, name);
        state.lookup(&key)?;
        state.objects.remove(&key);
        Ok(())
    }
}
