//! # Object Client
//!
//! CRUD boundary between reconcilers and the Kubernetes API.
//!
//! [`ObjectStore`] works on untyped [`DynamicObject`]s so a single
//! implementation serves every kind. [`KubeStore`] talks to the API server,
//! `testing::FakeStore` keeps objects in memory. Reconcilers use the typed
//! [`Client`] facade, which converts through serde.

use crate::controller::error::{Error, Result};
use async_trait::async_trait;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
};
use kube::runtime::reflector::ObjectRef;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

/// Any statically typed Kubernetes object the client can move through serde
pub trait Object:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> Object for T where
    T: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Identity of an object across kinds
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub group: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn of<K: Resource<DynamicType = ()>>(namespace: Option<&str>, name: &str) -> Self {
        Self {
            group: K::group(&()).into_owned(),
            kind: K::kind(&()).into_owned(),
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }

    pub fn for_object<K: Resource<DynamicType = ()>>(obj: &K) -> Self {
        Self::of::<K>(obj.namespace().as_deref(), &obj.name_any())
    }

    /// Whether this key names an object of kind `K`
    pub fn is_kind<K: Resource<DynamicType = ()>>(&self) -> bool {
        self.group == K::group(&()) && self.kind == K::kind(&())
    }

    /// Reflector reference used to enqueue the object on a controller
    pub fn to_object_ref<K: Resource<DynamicType = ()>>(&self) -> ObjectRef<K> {
        let reference = ObjectRef::new(&self.name);
        match &self.namespace {
            Some(namespace) => reference.within(namespace),
            None => reference,
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{}:{}/{}", self.group, self.kind, namespace, self.name),
            None => write!(f, "{}/{}:{}", self.group, self.kind, self.name),
        }
    }
}

/// Untyped object CRUD
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, ar: &ApiResource, namespace: Option<&str>, name: &str) -> Result<DynamicObject>;

    /// List objects whose labels contain every entry of `labels`
    async fn list(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>>;

    async fn create(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Replace an object; fails with Conflict when its resourceVersion is stale
    async fn update(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Write only the status subresource
    async fn update_status(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject>;

    async fn delete(&self, ar: &ApiResource, namespace: Option<&str>, name: &str) -> Result<()>;
}

/// [`ObjectStore`] backed by the API server
#[derive(Clone)]
pub struct KubeStore {
    client: kube::Client,
}

impl KubeStore {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn api(&self, ar: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(namespace) => Api::namespaced_with(self.client.clone(), namespace, ar),
            None => Api::all_with(self.client.clone(), ar),
        }
    }
}

pub(crate) fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// JSON merge patch writing `obj`'s status over the stored one
///
/// Carries the resourceVersion so a write based on a stale read conflicts.
pub(crate) fn status_patch(obj: &DynamicObject) -> Value {
    json!({
        "metadata": { "resourceVersion": obj.metadata.resource_version },
        "status": obj.data.get("status"),
    })
}

/// Apply an RFC 7386 merge patch to `target`
///
/// Null removes a key, objects merge key by key, anything else replaces.
pub(crate) fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        target.clone_from(patch);
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                apply_merge_patch(target.entry(key.as_str()).or_insert(Value::Null), value);
            }
        }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, ar: &ApiResource, namespace: Option<&str>, name: &str) -> Result<DynamicObject> {
        self.api(ar, namespace)
            .get(name)
            .await
            .map_err(|e| Error::from_kube(e, &ar.kind, namespace, name))
    }

    async fn list(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>> {
        let params = ListParams::default().labels(&label_selector(labels));
        let list = self
            .api(ar, namespace)
            .list(&params)
            .await
            .map_err(|e| Error::from_kube(e, &ar.kind, namespace, ""))?;
        Ok(list.items)
    }

    async fn create(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let namespace = obj.metadata.namespace.as_deref();
        let name = obj
            .metadata
            .name
            .clone()
            .or_else(|| obj.metadata.generate_name.clone())
            .unwrap_or_default();
        self.api(ar, namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| Error::from_kube(e, &ar.kind, namespace, &name))
    }

    async fn update(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let namespace = obj.metadata.namespace.as_deref();
        let name = obj.name_any();
        self.api(ar, namespace)
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| Error::from_kube(e, &ar.kind, namespace, &name))
    }

    async fn update_status(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let namespace = obj.metadata.namespace.as_deref();
        let name = obj.name_any();
        let patch = status_patch(obj);
        self.api(ar, namespace)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube(e, &ar.kind, namespace, &name))
    }

    async fn delete(&self, ar: &ApiResource, namespace: Option<&str>, name: &str) -> Result<()> {
        self.api(ar, namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| Error::from_kube(e, &ar.kind, namespace, name))
    }
}

/// Typed facade over an [`ObjectStore`]
#[derive(Clone)]
pub struct Client {
    store: Arc<dyn ObjectStore>,
}

impl Client {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn get<K: Object>(&self, namespace: Option<&str>, name: &str) -> Result<K> {
        let obj = self.store.get(&api_resource::<K>(), namespace, name).await?;
        from_dynamic(obj)
    }

    pub async fn list<K: Object>(
        &self,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>> {
        self.store
            .list(&api_resource::<K>(), namespace, labels)
            .await?
            .into_iter()
            .map(from_dynamic)
            .collect()
    }

    pub async fn create<K: Object>(&self, obj: &K) -> Result<K> {
        debug!(kind = %K::kind(&()), name = ?obj.meta().name, "creating object");
        let created = self
            .store
            .create(&api_resource::<K>(), &to_dynamic(obj)?)
            .await?;
        from_dynamic(created)
    }

    pub async fn update<K: Object>(&self, obj: &K) -> Result<K> {
        debug!(kind = %K::kind(&()), name = %obj.name_any(), "updating object");
        let updated = self
            .store
            .update(&api_resource::<K>(), &to_dynamic(obj)?)
            .await?;
        from_dynamic(updated)
    }

    pub async fn update_status<K: Object>(&self, obj: &K) -> Result<K> {
        let updated = self
            .store
            .update_status(&api_resource::<K>(), &to_dynamic(obj)?)
            .await?;
        from_dynamic(updated)
    }

    pub async fn delete<K: Object>(&self, obj: &K) -> Result<()> {
        debug!(kind = %K::kind(&()), name = %obj.name_any(), "deleting object");
        self.store
            .delete(&api_resource::<K>(), obj.namespace().as_deref(), &obj.name_any())
            .await
    }
}

pub(crate) fn api_resource<K: Resource<DynamicType = ()>>() -> ApiResource {
    ApiResource::erase::<K>(&())
}

/// Convert a typed object to its dynamic form, filling in apiVersion and kind
pub fn to_dynamic<K: Object>(obj: &K) -> Result<DynamicObject> {
    let mut value = serde_json::to_value(obj)?;
    if let Some(map) = value.as_object_mut() {
        map.insert("apiVersion".to_string(), K::api_version(&()).into());
        map.insert("kind".to_string(), K::kind(&()).into());
    }
    Ok(serde_json::from_value(value)?)
}

pub fn from_dynamic<K: Object>(obj: DynamicObject) -> Result<K> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}
