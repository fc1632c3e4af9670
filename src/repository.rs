//! Typed access to containers, images and profiles.
//!
//! Every method performs fresh control-plane calls through [`LxdClient`];
//! nothing is cached. Application-level failures (a well-formed answer that
//! reports an error) are returned as `None`, with the answer kept in
//! [`ContainerRepository::last_error`] for the caller to inspect.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::container::{Container, ContainerSpec};
use crate::error::LxdError;
use crate::lxd::{Answer, LxdClient};

/// Delay between two state polls while waiting for an address.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// API path segment for container resources.
///
/// Older LXD releases expose `/1.0/containers`, newer ones `/1.0/instances`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ResourceCollection {
    #[default]
    Containers,
    Instances,
}

impl ResourceCollection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceCollection::Containers => "containers",
            ResourceCollection::Instances => "instances",
        }
    }

    /// `/1.0/{collection}`.
    pub fn path(&self) -> String {
        format!("/1.0/{}", self.as_str())
    }

    /// `/1.0/{collection}/{name}`.
    pub fn resource_path(&self, name: &str) -> String {
        format!("/1.0/{}/{}", self.as_str(), name)
    }
}

impl fmt::Display for ResourceCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceCollection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "containers" => Ok(ResourceCollection::Containers),
            "instances" => Ok(ResourceCollection::Instances),
            other => Err(format!(
                "unknown resource collection '{other}', expected 'containers' or 'instances'"
            )),
        }
    }
}

/// Container state transitions accepted by `PUT .../state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StateAction {
    Start,
    Stop,
    Restart,
    Freeze,
    Unfreeze,
}

/// A requested state change. Unset fields fall back to the defaults
/// `force = true`, `stateful = false`, `timeout = 30`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateChange {
    pub action: Option<StateAction>,
    pub force: Option<bool>,
    pub stateful: Option<bool>,
    pub timeout: Option<u32>,
}

impl StateChange {
    pub fn new(action: StateAction) -> Self {
        Self {
            action: Some(action),
            ..Default::default()
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = Some(force);
        self
    }

    pub fn with_stateful(mut self, stateful: bool) -> Self {
        self.stateful = Some(stateful);
        self
    }

    pub fn with_timeout(mut self, seconds: u32) -> Self {
        self.timeout = Some(seconds);
        self
    }

    /// Request body with defaults merged under the explicit fields.
    ///
    /// `None` when no action was given.
    pub fn to_body(&self) -> Option<Value> {
        let action = self.action?;
        Some(json!({
            "action": action,
            "timeout": self.timeout.unwrap_or(30),
            "force": self.force.unwrap_or(true),
            "stateful": self.stateful.unwrap_or(false),
        }))
    }
}

/// How a creation answer is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    Failed,
}

/// Classifies the answer to a creation request.
///
/// An empty answer, or a synthetic answer for an HTTP status of 400 or more,
/// is a failure. Otherwise the request succeeded iff `metadata.status_code`
/// is below 400.
pub fn classify_create(answer: &Answer) -> CreateOutcome {
    if operation_succeeded(answer) {
        CreateOutcome::Created
    } else {
        CreateOutcome::Failed
    }
}

/// Success test shared by operations that resolve to a task record.
pub fn operation_succeeded(answer: &Answer) -> bool {
    if answer.is_empty() || answer.original_status().is_some_and(|s| s >= 400) {
        return false;
    }
    matches!(answer.metadata_status_code(), Some(code) if code < 400)
}

/// Returns the first `inet` address in `network.eth0.addresses` of a state record.
pub fn first_inet_address(state: &Value) -> Option<String> {
    state
        .pointer("/network/eth0/addresses")?
        .as_array()?
        .iter()
        .find(|entry| entry.get("family").and_then(Value::as_str) == Some("inet"))
        .and_then(|entry| entry.get("address"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Serializes a request body; failures are reported as `LxdError::Encode`.
pub fn encode_body<T: Serialize + ?Sized>(body: &T) -> Result<Vec<u8>, LxdError> {
    serde_json::to_vec(body).map_err(LxdError::Encode)
}

/// Last path segment of a resource URL such as `/1.0/images/abcd`.
pub fn resource_name(url: &str) -> &str {
    url.trim_end_matches('/').rsplit('/').next().unwrap_or(url)
}

/// Container, image and profile verbs on top of [`LxdClient`].
#[derive(Debug, Clone)]
pub struct ContainerRepository {
    client: LxdClient,
    collection: ResourceCollection,
    poll_interval: Duration,
    last_error: Option<Answer>,
}

impl ContainerRepository {
    pub fn new(client: LxdClient, collection: ResourceCollection) -> Self {
        Self {
            client,
            collection,
            poll_interval: DEFAULT_POLL_INTERVAL,
            last_error: None,
        }
    }

    /// Sets the delay between polls in [`Self::await_network_address`].
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn client(&self) -> &LxdClient {
        &self.client
    }

    pub fn collection(&self) -> ResourceCollection {
        self.collection
    }

    /// The answer of the last failed creation, if any.
    pub fn last_error(&self) -> Option<&Answer> {
        self.last_error.as_ref()
    }

    /// Container URLs in the order the control plane lists them.
    pub async fn list(&self) -> Result<Vec<Value>, LxdError> {
        Ok(self.client.get(&self.collection.path()).await?.list())
    }

    /// Container names, derived from [`Self::list`].
    pub async fn names(&self) -> Result<Vec<String>, LxdError> {
        Ok(self
            .list()
            .await?
            .iter()
            .filter_map(Value::as_str)
            .map(|url| resource_name(url).to_string())
            .collect())
    }

    /// Fetches one container; `None` if the answer does not describe one.
    pub async fn get(&self, name: &str) -> Result<Option<Container>, LxdError> {
        let answer = self.client.get(&self.collection.resource_path(name)).await?;
        if answer.is_empty() {
            return Ok(None);
        }
        Ok(Container::from_answer(answer))
    }

    /// Creates a container and waits for the creation task to finish.
    ///
    /// Returns `None` on failure; the failing answer is then available from
    /// [`Self::last_error`].
    pub async fn create(&mut self, spec: &ContainerSpec) -> Result<Option<Container>, LxdError> {
        let body = encode_body(spec)?;
        let answer = self.client.post(&self.collection.path(), &body).await?;

        match classify_create(&answer) {
            CreateOutcome::Created => {
                info!(container = %spec.name, "Container created");
                self.last_error = None;
                Ok(Some(Container::from_created(spec, answer)))
            }
            CreateOutcome::Failed => {
                warn!(
                    container = %spec.name,
                    reason = %answer.describe_failure(),
                    "Container creation failed"
                );
                self.last_error = Some(answer);
                Ok(None)
            }
        }
    }

    /// Deletes a container and returns the raw answer.
    ///
    /// Unlike [`Self::create`] the answer is not classified; callers decide
    /// what counts as success.
    pub async fn delete(&self, name: &str) -> Result<Answer, LxdError> {
        self.client
            .delete(&self.collection.resource_path(name))
            .await
    }

    /// Runtime state record (`.../state`), including network interfaces.
    pub async fn get_state(&self, name: &str) -> Result<Answer, LxdError> {
        self.client
            .get(&format!("{}/state", self.collection.resource_path(name)))
            .await
    }

    /// Requests a state change; `None` without a request if no action is set.
    pub async fn set_state(
        &self,
        name: &str,
        change: &StateChange,
    ) -> Result<Option<Answer>, LxdError> {
        let Some(body) = change.to_body() else {
            debug!(container = name, "No state action given");
            return Ok(None);
        };

        let path = format!("{}/state", self.collection.resource_path(name));
        let answer = self.client.put(&path, &encode_body(&body)?).await?;
        Ok(Some(answer))
    }

    /// Polls the container state until `eth0` has an `inet` address.
    ///
    /// Makes at most `max_attempts` polls, sleeping between them, and returns
    /// `None` if none of them reported an address.
    pub async fn await_network_address(
        &self,
        name: &str,
        max_attempts: u32,
    ) -> Result<Option<String>, LxdError> {
        for attempt in 1..=max_attempts {
            let state = self.get_state(name).await?;
            if let Some(address) = state.metadata().and_then(first_inet_address) {
                info!(container = name, address = %address, attempt, "Container has an address");
                return Ok(Some(address));
            }

            debug!(container = name, attempt, max_attempts, "No inet address yet");
            if attempt < max_attempts {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        warn!(container = name, max_attempts, "Gave up waiting for an address");
        Ok(None)
    }

    /// Image URLs in catalog order.
    pub async fn images(&self) -> Result<Vec<Value>, LxdError> {
        Ok(self.client.get("/1.0/images").await?.list())
    }

    /// Image detail by fingerprint or by the URL returned from [`Self::images`].
    pub async fn image(&self, fingerprint: &str) -> Result<Answer, LxdError> {
        if fingerprint.starts_with('/') {
            self.client.get(fingerprint).await
        } else {
            self.client
                .get(&format!("/1.0/images/{fingerprint}"))
                .await
        }
    }

    /// Profile URLs in listing order.
    pub async fn profiles(&self) -> Result<Vec<Value>, LxdError> {
        Ok(self.client.get("/1.0/profiles").await?.list())
    }

    pub async fn profile(&self, name: &str) -> Result<Answer, LxdError> {
        self.client.get(&format!("/1.0/profiles/{name}")).await
    }

    /// Fingerprint of the first image whose aliases, or whose
    /// `update_source.alias`, match `alias`.
    ///
    /// Fetches every image in turn, so it suits small catalogs only.
    pub async fn find_fingerprint_by_image_alias(
        &self,
        alias: &str,
    ) -> Result<Option<String>, LxdError> {
        for entry in self.images().await? {
            let Some(url) = entry.as_str() else {
                continue;
            };

            let detail = self.image(url).await?;
            let Some(metadata) = detail.metadata().and_then(Value::as_object) else {
                continue;
            };

            if image_matches_alias(metadata, alias) {
                let fingerprint = metadata
                    .get("fingerprint")
                    .and_then(Value::as_str)
                    .unwrap_or_else(|| resource_name(url))
                    .to_string();
                debug!(alias, fingerprint = %fingerprint, "Image alias resolved");
                return Ok(Some(fingerprint));
            }
        }

        Ok(None)
    }
}

fn image_matches_alias(metadata: &Map<String, Value>, alias: &str) -> bool {
    let in_aliases = metadata
        .get("aliases")
        .and_then(Value::as_array)
        .is_some_and(|aliases| {
            aliases.iter().any(|a| match a {
                Value::String(name) => name == alias,
                other => other.get("name").and_then(Value::as_str) == Some(alias),
            })
        });

    let update_source = metadata
        .get("update_source")
        .and_then(|s| s.get("alias"))
        .and_then(Value::as_str)
        == Some(alias);

    in_aliases || update_source
}
