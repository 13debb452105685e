
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use harness::{
    eventually, fast_config, EmitterHandle, FlakyPublisher, GatedPublisher, RecordingPublisher,
    RejectingPublisher,
};
use routesync_emitter::emission::{BackpressurePolicy, PushOutcome};
use routesync_emitter::PipelineError;
use routesync_events::{DesiredRoute, RoutingEvent};
use routesync_model::{Endpoint, RoutingEntry, RoutingKey};
use routesync_table::{MessagesToEmit, RegistryMessage, RouteMap, RoutingTable, Subject};
use routesync_testing::{assert_messages_match, endpoint, MessagesBuilder};

fn register_batch(key: &RoutingKey, endpoint: &Endpoint) -> MessagesToEmit {
    MessagesBuilder::new().register(key, &[endpoint]).build()
}

#[tokio::test]
async fn desired_state_then_incremental_updates_reach_the_bus() {
    let publisher = RecordingPublisher::new();
    let emitter =
        EmitterHandle::spawn(RoutingTable::new(), publisher.clone(), fast_config()).await;

    let key = RoutingKey::external("app.example.com");
    let a = endpoint("a", "10.0.0.1", 60000);
    let b = endpoint("b", "10.0.0.2", 60000);

    emitter
        .handler
        .handle(RoutingEvent::desired_state_sync(vec![DesiredRoute {
            key: key.clone(),
            entry: RoutingEntry::from_endpoints([a.clone(), b.clone()]),
        }]))
        .await
        .unwrap();
    eventually(|| publisher.count() == 1).await;
    assert_messages_match(
        &publisher.as_batch(),
        &MessagesBuilder::new().register(&key, &[&a, &b]).build(),
    );

    publisher.clear();
    emitter
        .handler
        .handle(RoutingEvent::endpoint_removed(key.clone(), a.clone()))
        .await
        .unwrap();
    eventually(|| publisher.count() == 1).await;
    assert_messages_match(
        &publisher.as_batch(),
        &MessagesBuilder::new().unregister(&key, &[&a]).build(),
    );

    emitter.pipeline.shutdown().await;
}

#[tokio::test]
async fn moved_instance_unregisters_before_registering() {
    let publisher = RecordingPublisher::new();
    let emitter =
        EmitterHandle::spawn(RoutingTable::new(), publisher.clone(), fast_config()).await;
    let key = RoutingKey::external("app.example.com");

    emitter
        .handler
        .handle(RoutingEvent::endpoint_added(key.clone(), endpoint("a", "10.0.0.1", 8080)))
        .await
        .unwrap();
    eventually(|| publisher.count() == 1).await;
    publisher.clear();

    emitter
        .handler
        .handle(RoutingEvent::endpoint_added(key.clone(), endpoint("a", "10.0.0.9", 8080)))
        .await
        .unwrap();
    eventually(|| publisher.count() == 2).await;

    let published = publisher.published();
    assert_eq!(published[0].0, Subject::RouterUnregister);
    assert_eq!(published[0].1.endpoints[0].host, "10.0.0.1");
    assert_eq!(published[1].0, Subject::RouterRegister);
    assert_eq!(published[1].1.endpoints[0].host, "10.0.0.9");

    emitter.pipeline.shutdown().await;
}

#[tokio::test]
async fn startup_and_periodic_resync_announce_the_table() {
    let mut routes = RouteMap::new();
    routes.insert(
        RoutingKey::external("app.example.com"),
        RoutingEntry::from_endpoints([endpoint("a", "10.0.0.1", 8080)]),
    );
    routes.insert(
        RoutingKey::internal("svc.internal"),
        RoutingEntry::from_endpoints([endpoint("b", "10.0.0.2", 8080)]),
    );

    let publisher = RecordingPublisher::new();
    let mut config = fast_config();
    config.resync_interval = Duration::from_millis(40);
    let emitter =
        EmitterHandle::spawn(RoutingTable::from_routes(routes), publisher.clone(), config).await;

    // Three passes, two messages each.
    eventually(|| publisher.count() >= 6).await;
    let published = publisher.published();
    assert!(published
        .iter()
        .all(|(s, _)| matches!(s, Subject::RouterRegister | Subject::InternalRegister)));
    assert!(published
        .iter()
        .any(|(s, m)| *s == Subject::InternalRegister && m.uris == vec!["svc.internal"]));

    let stats = emitter.pipeline.shutdown().await;
    assert!(stats.resync_passes >= 3);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let publisher = FlakyPublisher::new(2);
    let emitter =
        EmitterHandle::spawn(RoutingTable::new(), publisher.clone(), fast_config()).await;
    let key = RoutingKey::external("app.example.com");

    emitter
        .pipeline
        .handle()
        .submit(register_batch(&key, &endpoint("a", "10.0.0.1", 8080)))
        .await
        .unwrap();
    eventually(|| publisher.inner.count() == 1).await;

    assert_eq!(publisher.calls(), 3);
    let stats = emitter.pipeline.shutdown().await;
    assert_eq!(stats.publish_retries, 2);
    assert_eq!(stats.messages_published, 1);
    assert_eq!(stats.messages_failed, 0);
}

#[tokio::test]
async fn retries_stop_after_max_attempts() {
    let publisher = FlakyPublisher::new(100);
    let mut config = fast_config();
    config.retry.max_attempts = 3;
    let emitter = EmitterHandle::spawn(RoutingTable::new(), publisher.clone(), config).await;
    let handle = emitter.pipeline.handle();

    handle
        .submit(register_batch(
            &RoutingKey::external("app.example.com"),
            &endpoint("a", "10.0.0.1", 8080),
        ))
        .await
        .unwrap();
    eventually(|| handle.stats().messages_failed == 1).await;

    assert_eq!(publisher.calls(), 3);
    assert_eq!(handle.stats().publish_retries, 2);
    emitter.pipeline.shutdown().await;
}

#[tokio::test]
async fn permanent_failures_are_not_retried() {
    let publisher = RejectingPublisher::new();
    let emitter =
        EmitterHandle::spawn(RoutingTable::new(), publisher.clone(), fast_config()).await;
    let handle = emitter.pipeline.handle();

    handle
        .submit(register_batch(
            &RoutingKey::internal("svc"),
            &endpoint("a", "10.0.0.1", 8080),
        ))
        .await
        .unwrap();
    eventually(|| handle.stats().messages_failed == 1).await;

    assert_eq!(publisher.calls(), 1);
    assert_eq!(handle.stats().publish_retries, 0);
    emitter.pipeline.shutdown().await;
}

#[tokio::test]
async fn empty_batches_are_skipped() {
    let publisher = RecordingPublisher::new();
    let emitter =
        EmitterHandle::spawn(RoutingTable::new(), publisher.clone(), fast_config()).await;
    let handle = emitter.pipeline.handle();

    let outcome = handle.submit(MessagesToEmit::new()).await.unwrap();
    assert_eq!(outcome, PushOutcome::Skipped);
    assert_eq!(handle.stats().batches_submitted, 0);

    emitter.pipeline.shutdown().await;
    assert_eq!(publisher.count(), 0);
}

#[tokio::test]
async fn shutdown_rejects_new_batches() {
    let publisher = RecordingPublisher::new();
    let emitter =
        EmitterHandle::spawn(RoutingTable::new(), publisher.clone(), fast_config()).await;
    let handle = emitter.pipeline.handle();

    emitter.pipeline.shutdown().await;

    let err = handle
        .submit(register_batch(
            &RoutingKey::external("app.example.com"),
            &endpoint("a", "10.0.0.1", 8080),
        ))
        .await
        .unwrap_err();
    assert_eq!(err, PipelineError::ShuttingDown);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(publisher.count(), 0);
}

#[tokio::test]
async fn shutdown_discards_queue_and_aborts_stuck_publish() {
    let publisher = GatedPublisher::new();
    let emitter =
        EmitterHandle::spawn(RoutingTable::new(), publisher.clone(), fast_config()).await;
    let handle = emitter.pipeline.handle();
    let key = RoutingKey::external("app.example.com");

    for i in 1..=3u8 {
        handle
            .submit(register_batch(&key, &endpoint("a", &format!("10.0.0.{i}"), 8080)))
            .await
            .unwrap();
    }
    // First batch is in flight, blocked at the gate.
    eventually(|| publisher.started() == 1).await;

    let stats = emitter.pipeline.shutdown().await;
    assert_eq!(stats.batches_discarded, 2);
    assert_eq!(stats.messages_published, 0);

    publisher.release(10);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(publisher.inner.count(), 0);
}

#[tokio::test]
async fn full_queue_coalesces_to_net_effect() {
    let publisher = GatedPublisher::new();
    let mut config = fast_config();
    config.queue_capacity = 1;
    config.backpressure = BackpressurePolicy::Coalesce;
    let emitter = EmitterHandle::spawn(RoutingTable::new(), publisher.clone(), config).await;
    let handle = emitter.pipeline.handle();

    let key = RoutingKey::external("app.example.com");
    let a = endpoint("a", "10.0.0.1", 8080);
    let b = endpoint("b", "10.0.0.2", 8080);
    let c = endpoint("c", "10.0.0.3", 8080);

    handle.submit(register_batch(&key, &a)).await.unwrap();
    eventually(|| publisher.started() == 1).await;

    // Queue holds one batch; the next push folds both together.
    assert_eq!(
        handle.submit(register_batch(&key, &b)).await.unwrap(),
        PushOutcome::Queued
    );
    assert_eq!(
        handle
            .submit(MessagesBuilder::new().unregister(&key, &[&b]).build())
            .await
            .unwrap(),
        PushOutcome::Coalesced { merged: 1 }
    );
    assert_eq!(
        handle.submit(register_batch(&key, &c)).await.unwrap(),
        PushOutcome::Coalesced { merged: 1 }
    );

    publisher.release(10);
    eventually(|| publisher.inner.count() == 3).await;

    let published = publisher.inner.published();
    assert_eq!(published[0], (Subject::RouterRegister, message(&key, &[&a])));
    let rest: MessagesToEmit = {
        let mut batch = MessagesToEmit::new();
        for (subject, message) in published.into_iter().skip(1) {
            batch.push(subject, message);
        }
        batch
    };
    assert_messages_match(
        &rest,
        &MessagesBuilder::new()
            .unregister(&key, &[&b])
            .register(&key, &[&c])
            .build(),
    );

    let stats = emitter.pipeline.shutdown().await;
    assert_eq!(stats.batches_coalesced, 2);
}

#[tokio::test]
async fn block_policy_waits_for_the_worker() {
    let publisher = GatedPublisher::new();
    let mut config = fast_config();
    config.queue_capacity = 1;
    let emitter = EmitterHandle::spawn(RoutingTable::new(), publisher.clone(), config).await;
    let handle = emitter.pipeline.handle();
    let key = RoutingKey::internal("svc");

    handle
        .submit(register_batch(&key, &endpoint("a", "10.0.0.1", 8080)))
        .await
        .unwrap();
    eventually(|| publisher.started() == 1).await;
    handle
        .submit(register_batch(&key, &endpoint("b", "10.0.0.2", 8080)))
        .await
        .unwrap();

    let blocked = {
        let handle = handle.clone();
        let key = key.clone();
        tokio::spawn(async move {
            handle
                .submit(register_batch(&key, &endpoint("c", "10.0.0.3", 8080)))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!blocked.is_finished());

    publisher.release(10);
    assert_eq!(blocked.await.unwrap().unwrap(), PushOutcome::Queued);
    eventually(|| publisher.inner.count() == 3).await;

    emitter.pipeline.shutdown().await;
}

#[tokio::test]
async fn handler_never_blocks_on_slow_publishes_with_coalescing() {
    let publisher = GatedPublisher::new();
    let mut config = fast_config();
    config.queue_capacity = 2;
    config.backpressure = BackpressurePolicy::Coalesce;
    let emitter = EmitterHandle::spawn(RoutingTable::new(), publisher.clone(), config).await;
    let key = RoutingKey::external("app.example.com");

    let events = async {
        for i in 1..=50u16 {
            emitter
                .handler
                .handle(RoutingEvent::endpoint_added(
                    key.clone(),
                    endpoint(&format!("i{i}"), "10.0.0.1", 8000 + i),
                ))
                .await
                .unwrap();
        }
    };
    tokio::time::timeout(Duration::from_secs(1), events)
        .await
        .expect("handler blocked");
    assert_eq!(emitter.table.get(&key).await.unwrap().len(), 50);

    publisher.release(1000);
    let handle = emitter.pipeline.handle();
    eventually(|| {
        let stats = handle.stats();
        stats.batches_published == stats.batches_submitted - stats.batches_coalesced
    })
    .await;

    // Every instance reached the bus.
    let mut announced: Vec<String> = publisher
        .inner
        .published()
        .into_iter()
        .flat_map(|(_, m)| m.endpoints.into_iter().map(|e| e.instance_id))
        .collect();
    announced.sort();
    announced.dedup();
    assert_eq!(announced.len(), 50);

    emitter.pipeline.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn resync_never_re_registers_removed_routes() {
    let routes: Vec<(RoutingKey, Endpoint)> = (0..1000u16)
        .map(|i| {
            (
                RoutingKey::external(&format!("app{i}.example.com")),
                endpoint(&format!("i{i}"), "10.0.0.1", 8000 + i),
            )
        })
        .collect();
    let table = RoutingTable::from_routes(
        routes
            .iter()
            .map(|(key, ep)| (key.clone(), RoutingEntry::from_endpoints([ep.clone()])))
            .collect(),
    );

    let publisher = RecordingPublisher::new();
    let mut config = fast_config();
    config.resync_interval = Duration::from_millis(1);
    config.queue_capacity = 64;
    config.backpressure = BackpressurePolicy::Coalesce;
    let emitter = EmitterHandle::spawn(table, publisher.clone(), config).await;

    let removers: Vec<_> = routes
        .chunks(250)
        .map(|chunk| {
            let handler = emitter.handler.clone();
            let chunk = chunk.to_vec();
            tokio::spawn(async move {
                for (key, ep) in chunk {
                    handler
                        .handle(RoutingEvent::endpoint_removed(key, ep))
                        .await
                        .unwrap();
                }
            })
        })
        .collect();
    for remover in removers {
        remover.await.unwrap();
    }
    assert!(emitter.table.is_empty().await);

    let handle = emitter.pipeline.handle();
    eventually(|| {
        let stats = handle.stats();
        stats.batches_published == stats.batches_submitted - stats.batches_coalesced
    })
    .await;

    // Replay the bus in order: what the router still holds.
    let mut registered = BTreeSet::new();
    for (subject, message) in publisher.published() {
        for address in &message.endpoints {
            let route = (message.uris.clone(), address.instance_id.clone());
            match subject {
                Subject::RouterRegister | Subject::InternalRegister => {
                    registered.insert(route);
                }
                Subject::RouterUnregister | Subject::InternalUnregister => {
                    registered.remove(&route);
                }
            }
        }
    }
    assert!(
        registered.is_empty(),
        "{} removed routes left registered",
        registered.len()
    );

    emitter.pipeline.shutdown().await;
}

fn message(key: &RoutingKey, endpoints: &[&Endpoint]) -> RegistryMessage {
    RegistryMessage::for_key(key, endpoints.iter().copied(), &BTreeMap::new())
}
