//! Snapshot of one container resource.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::lxd::Answer;

/// Image source of a container to be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSource {
    /// Source type, `image` for image-based containers.
    #[serde(rename = "type")]
    pub source_type: String,
    /// Image server protocol, e.g. `simplestreams`.
    pub protocol: String,
    /// Fingerprint of a locally available image.
    pub fingerprint: String,
}

impl ImageSource {
    /// A local image referenced by fingerprint.
    pub fn image(fingerprint: impl Into<String>) -> Self {
        Self {
            source_type: "image".to_string(),
            protocol: "simplestreams".to_string(),
            fingerprint: fingerprint.into(),
        }
    }
}

/// Body of a container creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub source: ImageSource,
    pub profiles: Vec<String>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: ImageSource::image(fingerprint),
            profiles: Vec::new(),
        }
    }

    pub fn with_profiles(mut self, profiles: Vec<String>) -> Self {
        self.profiles = profiles;
        self
    }
}

/// A container as reported by the control plane.
///
/// Values are built fresh from every read and only the local address may be
/// filled in afterwards, once.
#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    name: String,
    local_address: Option<String>,
    image_fingerprint: Option<String>,
    profiles: Vec<String>,
    raw: Answer,
}

impl Container {
    /// Builds a container from a resource answer (`GET /1.0/containers/{name}`).
    ///
    /// Returns `None` unless `metadata` is an object carrying a `name`.
    pub fn from_answer(answer: Answer) -> Option<Self> {
        let metadata = answer.metadata()?.as_object()?;
        let name = metadata.get("name")?.as_str()?.to_string();
        let profiles = string_list(metadata.get("profiles"));
        let image_fingerprint = metadata
            .get("config")
            .and_then(|c| c.get("volatile.base_image"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Some(Self {
            name,
            local_address: None,
            image_fingerprint,
            profiles,
            raw: answer,
        })
    }

    /// Builds a container from a successful creation answer.
    ///
    /// The answer describes the creation task rather than the container, so
    /// the identity comes from the request.
    pub fn from_created(spec: &ContainerSpec, answer: Answer) -> Self {
        Self {
            name: spec.name.clone(),
            local_address: None,
            image_fingerprint: Some(spec.source.fingerprint.clone()),
            profiles: spec.profiles.clone(),
            raw: answer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_address(&self) -> Option<&str> {
        self.local_address.as_deref()
    }

    pub fn image_fingerprint(&self) -> Option<&str> {
        self.image_fingerprint.as_deref()
    }

    pub fn profiles(&self) -> &[String] {
        &self.profiles
    }

    /// The answer this container was built from.
    pub fn raw(&self) -> &Answer {
        &self.raw
    }

    /// `metadata.status` (e.g. `Running`), if reported.
    pub fn status(&self) -> Option<&str> {
        self.raw
            .metadata()
            .and_then(|m| m.get("status"))
            .and_then(Value::as_str)
    }

    /// Records the container's local address.
    ///
    /// Returns `false` and keeps the old value if an address is already set.
    pub fn set_local_address(&mut self, address: impl Into<String>) -> bool {
        if self.local_address.is_some() {
            return false;
        }
        self.local_address = Some(address.into());
        true
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detail() -> Answer {
        Answer::new(json!({
            "type": "sync",
            "status": "Success",
            "status_code": 200,
            "operation": "",
            "metadata": {
                "name": "test2",
                "status": "Running",
                "status_code": 103,
                "profiles": ["prof1", "prof2"],
                "config": {"volatile.base_image": "1b6a6d7a59eb"}
            }
        }))
    }

    #[test]
    fn test_from_answer() {
        let container = Container::from_answer(detail()).unwrap();

        assert_eq!(container.name(), "test2");
        assert_eq!(container.profiles(), ["prof1", "prof2"]);
        assert_eq!(container.image_fingerprint(), Some("1b6a6d7a59eb"));
        assert_eq!(container.status(), Some("Running"));
        assert_eq!(container.local_address(), None);
        assert_eq!(container.raw().as_value()["metadata"]["name"], "test2");
    }

    #[test]
    fn test_from_answer_requires_name() {
        assert!(Container::from_answer(Answer::empty()).is_none());
        assert!(Container::from_answer(Answer::new(json!({"metadata": ["a"]}))).is_none());
        assert!(Container::from_answer(Answer::new(json!({"metadata": {"status": "x"}}))).is_none());
    }

    #[test]
    fn test_local_address_is_set_once() {
        let mut container = Container::from_answer(detail()).unwrap();

        assert!(container.set_local_address("10.0.3.15"));
        assert!(!container.set_local_address("10.0.3.16"));
        assert_eq!(container.local_address(), Some("10.0.3.15"));
    }

    #[test]
    fn test_spec_serializes_to_create_body() {
        let spec = ContainerSpec::new("test3", "123123123").with_profiles(vec!["default".into()]);
        let body = serde_json::to_value(&spec).unwrap();

        assert_eq!(
            body,
            json!({
                "name": "test3",
                "source": {"type": "image", "protocol": "simplestreams", "fingerprint": "123123123"},
                "profiles": ["default"]
            })
        );
    }

    #[test]
    fn test_from_created() {
        let spec = ContainerSpec::new("web1", "abc").with_profiles(vec!["disk-local".into()]);
        let container = Container::from_created(&spec, Answer::new(json!({"metadata": {"status_code": 200}})));

        assert_eq!(container.name(), "web1");
        assert_eq!(container.image_fingerprint(), Some("abc"));
        assert_eq!(container.profiles(), ["disk-local"]);
    }
}
