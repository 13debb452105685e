//! Diff engine.
//!
//! Pure functions computing the registry messages that move the router from
//! one table state to another. Endpoints are compared by instance identity:
//!
//! - present only in the current entry: registered
//! - present only in the previous entry: unregistered
//! - present in both with different address, port, or TLS: the old address is
//!   unregistered and the new one registered
//! - present in both with only a freshness change: no message
//!
//! A change of route tags re-registers every announced endpoint so the router
//! picks up the new tags. Messages that would carry no endpoints are never
//! produced.

use std::collections::BTreeMap;

use routesync_model::{Endpoint, RoutingEntry, RoutingKey};

use crate::messages::{Action, MessagesToEmit, RegistryMessage, Subject};
use crate::table::RouteMap;

/// Messages for a single key moving from `previous` to `current`.
///
/// `None` means the key is absent. Present entries must be non-empty; an
/// empty entry is a broken table invariant.
pub fn diff_entry(
    key: &RoutingKey,
    previous: Option<&RoutingEntry>,
    current: Option<&RoutingEntry>,
) -> MessagesToEmit {
    debug_assert!(
        previous.map_or(true, |e| !e.is_empty()),
        "previous entry for {key} is empty"
    );
    debug_assert!(
        current.map_or(true, |e| !e.is_empty()),
        "current entry for {key} is empty"
    );

    let visibility = key.visibility();
    let before: BTreeMap<&str, &Endpoint> = previous
        .map(|e| {
            e.announced(visibility)
                .map(|ep| (ep.instance_id.as_str(), ep))
                .collect()
        })
        .unwrap_or_default();
    let after: BTreeMap<&str, &Endpoint> = current
        .map(|e| {
            e.announced(visibility)
                .map(|ep| (ep.instance_id.as_str(), ep))
                .collect()
        })
        .unwrap_or_default();

    let tags_changed = matches!((previous, current), (Some(p), Some(c)) if p.tags != c.tags);

    let mut registered: Vec<&Endpoint> = Vec::new();
    let mut unregistered: Vec<&Endpoint> = Vec::new();

    for (id, endpoint) in &after {
        match before.get(id) {
            None => registered.push(*endpoint),
            Some(old) if old.published_fields_differ(endpoint) => {
                unregistered.push(*old);
                registered.push(*endpoint);
            }
            Some(_) if tags_changed => registered.push(*endpoint),
            Some(_) => {}
        }
    }

    for (id, endpoint) in &before {
        if !after.contains_key(id) {
            unregistered.push(*endpoint);
        }
    }

    let mut messages = MessagesToEmit::new();
    if let Some(current) = current {
        messages.push(
            Subject::for_route(visibility, Action::Register),
            RegistryMessage::for_key(key, registered, &current.tags),
        );
    }
    if let Some(previous) = previous {
        messages.push(
            Subject::for_route(visibility, Action::Unregister),
            RegistryMessage::for_key(key, unregistered, &previous.tags),
        );
    }
    messages
}

/// Messages moving the router from the `previous` table to the `current` one.
pub fn diff_tables(previous: &RouteMap, current: &RouteMap) -> MessagesToEmit {
    let mut messages = MessagesToEmit::new();

    for (key, entry) in current {
        messages.merge(diff_entry(key, previous.get(key), Some(entry)));
    }
    for (key, entry) in previous {
        if !current.contains_key(key) {
            messages.merge(diff_entry(key, Some(entry), None));
        }
    }

    messages
}

/// Registrations for every announced endpoint, as if the router knew nothing.
///
/// This is the full-resync batch.
pub fn registrations<'a>(
    routes: impl IntoIterator<Item = (&'a RoutingKey, &'a RoutingEntry)>,
) -> MessagesToEmit {
    let mut messages = MessagesToEmit::new();
    for (key, entry) in routes {
        messages.merge(diff_entry(key, None, Some(entry)));
    }
    messages
}
