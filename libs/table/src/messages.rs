//! Registry messages and emission batches.
//!
//! A [`RegistryMessage`] is the unit the router tier consumes: the route's
//! visible names, the backend addresses behind it, and the route tags.
//! Messages travel on one of four subjects; [`MessagesToEmit`] keeps them
//! partitioned the same way.
//!
//! Batches are sets, not sequences. Two batches are equivalent when each of
//! the four collections holds the same messages after canonicalization
//! (sorted names and addresses), regardless of emission order.

use std::collections::{BTreeMap, BTreeSet};

use routesync_model::{Endpoint, RoutingKey, Visibility};
use serde::{Deserialize, Serialize};

/// Direction of a registry message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Action {
    Register,
    Unregister,
}

/// Bus subject a message is published on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Subject {
    #[serde(rename = "router.register")]
    RouterRegister,
    #[serde(rename = "router.unregister")]
    RouterUnregister,
    #[serde(rename = "service-discovery.register")]
    InternalRegister,
    #[serde(rename = "service-discovery.unregister")]
    InternalUnregister,
}

impl Subject {
    /// Publish order inside one batch: unregistrations first, so an address
    /// that is re-registered with different fields is not removed afterwards.
    pub const PUBLISH_ORDER: [Subject; 4] = [
        Subject::RouterUnregister,
        Subject::InternalUnregister,
        Subject::RouterRegister,
        Subject::InternalRegister,
    ];

    pub fn for_route(visibility: Visibility, action: Action) -> Self {
        match (visibility, action) {
            (Visibility::External, Action::Register) => Subject::RouterRegister,
            (Visibility::External, Action::Unregister) => Subject::RouterUnregister,
            (Visibility::Internal, Action::Register) => Subject::InternalRegister,
            (Visibility::Internal, Action::Unregister) => Subject::InternalUnregister,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Subject::RouterRegister => "router.register",
            Subject::RouterUnregister => "router.unregister",
            Subject::InternalRegister => "service-discovery.register",
            Subject::InternalUnregister => "service-discovery.unregister",
        }
    }

    pub fn visibility(&self) -> Visibility {
        match self {
            Subject::RouterRegister | Subject::RouterUnregister => Visibility::External,
            Subject::InternalRegister | Subject::InternalUnregister => Visibility::Internal,
        }
    }

    pub fn action(&self) -> Action {
        match self {
            Subject::RouterRegister | Subject::InternalRegister => Action::Register,
            Subject::RouterUnregister | Subject::InternalUnregister => Action::Unregister,
        }
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fields of an endpoint the router sees.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BackendAddress {
    pub host: String,
    pub port: u16,
    pub instance_id: String,
    #[serde(default)]
    pub tls: bool,
}

impl From<&Endpoint> for BackendAddress {
    fn from(endpoint: &Endpoint) -> Self {
        Self {
            host: endpoint.host.clone(),
            port: endpoint.port,
            instance_id: endpoint.instance_id.clone(),
            tls: endpoint.tls,
        }
    }
}

/// A registration or unregistration directive for one route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryMessage {
    /// Visible names of the route.
    pub uris: Vec<String>,
    /// Backend addresses the directive applies to.
    pub endpoints: Vec<BackendAddress>,
    /// Route tags.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl RegistryMessage {
    /// Build a message for `key` covering `endpoints`.
    pub fn for_key<'a>(
        key: &RoutingKey,
        endpoints: impl IntoIterator<Item = &'a Endpoint>,
        tags: &BTreeMap<String, String>,
    ) -> Self {
        Self {
            uris: vec![key.uri()],
            endpoints: endpoints.into_iter().map(BackendAddress::from).collect(),
            tags: tags.clone(),
        }
    }

    /// Copy with names and addresses sorted.
    pub fn canonical(&self) -> Self {
        let mut message = self.clone();
        message.uris.sort();
        message.endpoints.sort();
        message
    }

    /// String form used to order canonical messages.
    pub fn canonical_string(&self) -> String {
        format!("{:?}", self.canonical())
    }

    /// Identity used to coalesce messages for the same route.
    fn route_identity(&self) -> Vec<String> {
        let mut uris = self.uris.clone();
        uris.sort();
        uris.dedup();
        uris
    }
}

/// A batch of registry messages partitioned by subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagesToEmit {
    #[serde(default)]
    pub registration_messages: Vec<RegistryMessage>,
    #[serde(default)]
    pub unregistration_messages: Vec<RegistryMessage>,
    #[serde(default)]
    pub internal_registration_messages: Vec<RegistryMessage>,
    #[serde(default)]
    pub internal_unregistration_messages: Vec<RegistryMessage>,
}

impl MessagesToEmit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages for one subject.
    pub fn get(&self, subject: Subject) -> &[RegistryMessage] {
        match subject {
            Subject::RouterRegister => &self.registration_messages,
            Subject::RouterUnregister => &self.unregistration_messages,
            Subject::InternalRegister => &self.internal_registration_messages,
            Subject::InternalUnregister => &self.internal_unregistration_messages,
        }
    }

    fn get_mut(&mut self, subject: Subject) -> &mut Vec<RegistryMessage> {
        match subject {
            Subject::RouterRegister => &mut self.registration_messages,
            Subject::RouterUnregister => &mut self.unregistration_messages,
            Subject::InternalRegister => &mut self.internal_registration_messages,
            Subject::InternalUnregister => &mut self.internal_unregistration_messages,
        }
    }

    /// Add a message; messages with no endpoints are dropped.
    pub fn push(&mut self, subject: Subject, message: RegistryMessage) {
        if message.endpoints.is_empty() {
            return;
        }
        self.get_mut(subject).push(message);
    }

    /// Append every message of `other`.
    pub fn merge(&mut self, other: MessagesToEmit) {
        self.registration_messages.extend(other.registration_messages);
        self.unregistration_messages
            .extend(other.unregistration_messages);
        self.internal_registration_messages
            .extend(other.internal_registration_messages);
        self.internal_unregistration_messages
            .extend(other.internal_unregistration_messages);
    }

    pub fn is_empty(&self) -> bool {
        self.message_count() == 0
    }

    pub fn message_count(&self) -> usize {
        self.registration_messages.len()
            + self.unregistration_messages.len()
            + self.internal_registration_messages.len()
            + self.internal_unregistration_messages.len()
    }

    /// Messages in publish order, paired with their subject.
    pub fn iter(&self) -> impl Iterator<Item = (Subject, &RegistryMessage)> {
        Subject::PUBLISH_ORDER
            .into_iter()
            .flat_map(move |subject| self.get(subject).iter().map(move |m| (subject, m)))
    }

    /// Copy with each collection canonicalized and sorted.
    pub fn canonical(&self) -> Self {
        let sorted = |messages: &[RegistryMessage]| {
            let mut keyed: Vec<(String, RegistryMessage)> = messages
                .iter()
                .map(|m| {
                    let canonical = m.canonical();
                    (format!("{:?}", canonical), canonical)
                })
                .collect();
            keyed.sort_by(|a, b| a.0.cmp(&b.0));
            keyed.into_iter().map(|(_, m)| m).collect::<Vec<_>>()
        };

        Self {
            registration_messages: sorted(&self.registration_messages),
            unregistration_messages: sorted(&self.unregistration_messages),
            internal_registration_messages: sorted(&self.internal_registration_messages),
            internal_unregistration_messages: sorted(&self.internal_unregistration_messages),
        }
    }

    /// Order-independent equality over all four collections.
    pub fn equivalent(&self, other: &MessagesToEmit) -> bool {
        Subject::PUBLISH_ORDER
            .into_iter()
            .all(|s| self.get(s).len() == other.get(s).len())
            && self.canonical() == other.canonical()
    }

    /// Fold batches, in order, into their net effect per route.
    ///
    /// A later registration of an address cancels an earlier queued
    /// unregistration of it and vice versa; the latest tags win. Within one
    /// batch, unregistrations apply before registrations.
    pub fn coalesce(batches: impl IntoIterator<Item = MessagesToEmit>) -> MessagesToEmit {
        #[derive(Default)]
        struct RouteNet {
            uris: Vec<String>,
            register: BTreeSet<BackendAddress>,
            register_tags: BTreeMap<String, String>,
            unregister: BTreeSet<BackendAddress>,
            unregister_tags: BTreeMap<String, String>,
        }

        let mut routes: BTreeMap<(Visibility, Vec<String>), RouteNet> = BTreeMap::new();

        for batch in batches {
            for subject in Subject::PUBLISH_ORDER {
                for message in batch.get(subject) {
                    let net = routes
                        .entry((subject.visibility(), message.route_identity()))
                        .or_default();
                    net.uris = message.uris.clone();

                    match subject.action() {
                        Action::Register => {
                            for address in &message.endpoints {
                                net.unregister.remove(address);
                                net.register.insert(address.clone());
                            }
                            net.register_tags = message.tags.clone();
                        }
                        Action::Unregister => {
                            for address in &message.endpoints {
                                net.register.remove(address);
                                net.unregister.insert(address.clone());
                            }
                            net.unregister_tags = message.tags.clone();
                        }
                    }
                }
            }
        }

        let mut out = MessagesToEmit::new();
        for ((visibility, _), net) in routes {
            out.push(
                Subject::for_route(visibility, Action::Unregister),
                RegistryMessage {
                    uris: net.uris.clone(),
                    endpoints: net.unregister.into_iter().collect(),
                    tags: net.unregister_tags,
                },
            );
            out.push(
                Subject::for_route(visibility, Action::Register),
                RegistryMessage {
                    uris: net.uris,
                    endpoints: net.register.into_iter().collect(),
                    tags: net.register_tags,
                },
            );
        }
        out
    }
}
