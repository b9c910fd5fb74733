//! Object model for the splitter.
//!
//! Every object carries an [`ObjectMeta`]; its [`ObjectKey`] is the only
//! correlation token shared by the mirror, the work queue and the reconcile
//! step. All types round-trip through serde so manifests and CLI output can
//! use them directly.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resource::Resource;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Stable identity of one object: `namespace/name`, or just `name` for
/// cluster-scoped objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.map(str::to_owned),
            name: name.into(),
        }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => self.name.fmt(f),
        }
    }
}

/// Error returned when a string is not a valid `namespace/name` key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid object key '{0}': expected 'name' or 'namespace/name'")]
pub struct InvalidKey(pub String);

impl FromStr for ObjectKey {
    type Err = InvalidKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::namespaced(ns, name))
            }
            None if !s.is_empty() => Ok(Self::cluster_scoped(s)),
            _ => Err(InvalidKey(s.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Points at the object that owns this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Version token assigned by the store; required for conditional writes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn named(namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.map(str::to_owned),
            ..Self::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Deployment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    /// Desired pod count; `None` means the platform default of 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    /// Pod template, carried through untouched.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub template: serde_json::Value,
}

impl DeploymentSpec {
    pub fn desired_replicas(&self) -> i32 {
        self.replicas.unwrap_or(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploymentStatus {
    pub replicas: i32,
    pub updated_replicas: i32,
    pub ready_replicas: i32,
    pub available_replicas: i32,
    pub unavailable_replicas: i32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<DeploymentCondition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Deployment {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: DeploymentSpec,
    #[serde(default)]
    pub status: DeploymentStatus,
}

impl Deployment {
    pub fn new(namespace: &str, name: impl Into<String>, replicas: i32) -> Self {
        Self {
            metadata: ObjectMeta::named(Some(namespace), name),
            spec: DeploymentSpec {
                replicas: Some(replicas),
                template: serde_json::Value::Null,
            },
            status: DeploymentStatus::default(),
        }
    }
}

impl Resource for Deployment {
    const KIND: &'static str = "Deployment";
    type Status = DeploymentStatus;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn status(&self) -> &DeploymentStatus {
        &self.status
    }

    fn status_mut(&mut self) -> &mut DeploymentStatus {
        &mut self.status
    }
}

// ---------------------------------------------------------------------------
// Cluster
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterStatus {
    #[serde(default)]
    pub ready: bool,
}

/// A physical cluster that leaf deployments can be scheduled onto.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cluster {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ClusterSpec,
    #[serde(default)]
    pub status: ClusterStatus,
}

impl Cluster {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::named(None, name),
            ..Self::default()
        }
    }
}

impl Resource for Cluster {
    const KIND: &'static str = "Cluster";
    type Status = ClusterStatus;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn status(&self) -> &ClusterStatus {
        &self.status
    }

    fn status_mut(&mut self) -> &mut ClusterStatus {
        &mut self.status
    }
}

// ---------------------------------------------------------------------------
// Store payloads
// ---------------------------------------------------------------------------

/// One change notification from a watch stream.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<O> {
    Added(O),
    Modified(O),
    Deleted(O),
}

impl<O> WatchEvent<O> {
    pub fn object(&self) -> &O {
        match self {
            WatchEvent::Added(o) | WatchEvent::Modified(o) | WatchEvent::Deleted(o) => o,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WatchEvent::Added(_) => "added",
            WatchEvent::Modified(_) => "modified",
            WatchEvent::Deleted(_) => "deleted",
        }
    }
}

/// Full listing plus the version to start watching from.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectList<O> {
    pub items: Vec<O>,
    pub resource_version: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_display() {
        assert_eq!(ObjectKey::namespaced("default", "web").to_string(), "default/web");
        assert_eq!(ObjectKey::cluster_scoped("east").to_string(), "east");
    }

    #[test]
    fn key_parse_roundtrip() {
        let key: ObjectKey = "default/web".parse().expect("parse");
        assert_eq!(key, ObjectKey::namespaced("default", "web"));
        assert_eq!(key.to_string().parse::<ObjectKey>().expect("reparse"), key);
    }

    #[test]
    fn key_parse_rejects_malformed() {
        for bad in ["", "/web", "default/", "a/b/c"] {
            assert!(bad.parse::<ObjectKey>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn desired_replicas_defaults_to_one() {
        assert_eq!(DeploymentSpec::default().desired_replicas(), 1);
        assert_eq!(Deployment::new("default", "web", 4).spec.desired_replicas(), 4);
    }

    #[test]
    fn deployment_yaml_uses_camel_case_status() {
        let mut d = Deployment::new("default", "web", 3);
        d.status.ready_replicas = 2;
        let yaml = serde_yaml::to_string(&d).expect("serialize");
        assert!(yaml.contains("readyReplicas: 2"), "got: {yaml}");
        let back: Deployment = serde_yaml::from_str(&yaml).expect("deserialize");
        assert_eq!(back, d);
    }

    #[test]
    fn condition_type_field_is_renamed() {
        let cond = DeploymentCondition {
            type_: "Progressing".into(),
            status: ConditionStatus::False,
            reason: "NoRegisteredClusters".into(),
            message: String::new(),
            last_transition_time: None,
        };
        let json = serde_json::to_value(&cond).expect("serialize");
        assert_eq!(json["type"], "Progressing");
        assert_eq!(json["status"], "False");
    }
}
