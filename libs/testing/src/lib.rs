//! # routesync-testing
//!
//! Test support for the route emitter.
//!
//! - [`MessagesToEmitMatcher`]: order-independent comparison of emission
//!   batches (sizes per collection must match; messages compare after their
//!   names and addresses are sorted and the messages themselves are ordered
//!   by canonical string form)
//! - [`MessagesBuilder`]: builds expected batches without spelling out subjects
//! - [`endpoint`]: fixture endpoint with an empty freshness tag

use std::collections::BTreeMap;

use routesync_model::{Endpoint, RoutingKey};
use routesync_table::{Action, MessagesToEmit, RegistryMessage, Subject};

/// Matcher for [`MessagesToEmit`] batches.
#[derive(Debug, Clone)]
pub struct MessagesToEmitMatcher {
    expected: MessagesToEmit,
}

/// Build a matcher expecting `expected`.
pub fn match_messages_to_emit(expected: MessagesToEmit) -> MessagesToEmitMatcher {
    MessagesToEmitMatcher { expected }
}

impl MessagesToEmitMatcher {
    pub fn matches(&self, actual: &MessagesToEmit) -> bool {
        Subject::PUBLISH_ORDER
            .into_iter()
            .all(|subject| match_collection(actual.get(subject), self.expected.get(subject)))
    }

    /// Collections that differ, by subject.
    pub fn mismatched_subjects(&self, actual: &MessagesToEmit) -> Vec<Subject> {
        Subject::PUBLISH_ORDER
            .into_iter()
            .filter(|subject| {
                !match_collection(actual.get(*subject), self.expected.get(*subject))
            })
            .collect()
    }

    pub fn failure_message(&self, actual: &MessagesToEmit) -> String {
        format!(
            "Expected\n{:#?}\nto match\n{:#?}\n(mismatched: {})",
            actual.canonical(),
            self.expected.canonical(),
            self.mismatched_subjects(actual)
                .iter()
                .map(Subject::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

fn match_collection(actual: &[RegistryMessage], expected: &[RegistryMessage]) -> bool {
    if actual.len() != expected.len() {
        return false;
    }

    let canonical = |messages: &[RegistryMessage]| {
        let mut keyed: Vec<(String, RegistryMessage)> = messages
            .iter()
            .map(|m| (m.canonical_string(), m.canonical()))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        keyed
    };

    canonical(actual)
        .into_iter()
        .zip(canonical(expected))
        .all(|((_, a), (_, e))| a == e)
}

/// Panic unless `actual` matches `expected` regardless of order.
#[track_caller]
pub fn assert_messages_match(actual: &MessagesToEmit, expected: &MessagesToEmit) {
    let matcher = match_messages_to_emit(expected.clone());
    if !matcher.matches(actual) {
        panic!("{}", matcher.failure_message(actual));
    }
}

/// Builds expected batches; the subject follows from the key's visibility.
#[derive(Debug, Default)]
pub struct MessagesBuilder {
    messages: MessagesToEmit,
}

impl MessagesBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(self, key: &RoutingKey, endpoints: &[&Endpoint]) -> Self {
        self.message(key, Action::Register, endpoints, BTreeMap::new())
    }

    pub fn unregister(self, key: &RoutingKey, endpoints: &[&Endpoint]) -> Self {
        self.message(key, Action::Unregister, endpoints, BTreeMap::new())
    }

    pub fn register_tagged(
        self,
        key: &RoutingKey,
        endpoints: &[&Endpoint],
        tags: &[(&str, &str)],
    ) -> Self {
        self.message(key, Action::Register, endpoints, tag_map(tags))
    }

    fn message(
        mut self,
        key: &RoutingKey,
        action: Action,
        endpoints: &[&Endpoint],
        tags: BTreeMap<String, String>,
    ) -> Self {
        self.messages.push(
            Subject::for_route(key.visibility(), action),
            RegistryMessage::for_key(key, endpoints.iter().copied(), &tags),
        );
        self
    }

    pub fn build(self) -> MessagesToEmit {
        self.messages
    }
}

fn tag_map(tags: &[(&str, &str)]) -> BTreeMap<String, String> {
    tags.iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Endpoint with an empty freshness tag.
pub fn endpoint(instance_id: &str, host: &str, port: u16) -> Endpoint {
    Endpoint::new(instance_id, host, port)
}
