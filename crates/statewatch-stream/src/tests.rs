//! Unit tests for event delivery.

use std::time::{Duration, Instant};

use statewatch_types::{Deployment, DeploymentStatus, Job, DEFAULT_NAMESPACE};

use crate::{
    BrokerConfig, DeploymentEvent, Event, EventBroker, EventPayload, Events, StreamError,
    SubscribeRequest, Topic,
};

fn deployment_event(index: u64, job: &Job) -> Event {
    let deployment = Deployment::new(job);
    Event::new(
        "DeploymentUpsert",
        deployment.id.clone(),
        deployment.namespace.clone(),
        index,
        EventPayload::Deployment(DeploymentEvent {
            deployment,
            job: Some(job.clone()),
            eval: None,
        }),
    )
    .with_filter_keys([job.id.clone()])
}

fn batch(index: u64) -> Events {
    let job = Job::new(DEFAULT_NAMESPACE, "web");
    Events {
        index,
        events: vec![deployment_event(index, &job)],
    }
}

async fn publish_all(broker: &EventBroker, indices: &[u64]) {
    for &index in indices {
        broker.publish(batch(index)).expect("broker should accept publish");
    }
    broker.last_index().await.expect("broker should be running");
}

// ── Delivery ─────────────────────────────────────────────────────────

#[tokio::test]
async fn subscriber_receives_published_batch() {
    let broker = EventBroker::spawn(BrokerConfig::default());
    let mut sub = broker.subscribe(SubscribeRequest::all(0)).await.unwrap();

    publish_all(&broker, &[7]).await;

    let got = sub.next().await.expect("should receive batch");
    assert_eq!(got.index, 7);
    assert_eq!(got.len(), 1);
    assert_eq!(got.events[0].index, 7);
    assert_eq!(sub.cursor(), 8);
}

#[tokio::test]
async fn start_index_excludes_older_batches() {
    let broker = EventBroker::spawn(BrokerConfig::default());
    publish_all(&broker, &[10, 20, 30]).await;

    let mut sub = broker.subscribe(SubscribeRequest::all(20)).await.unwrap();

    assert_eq!(sub.next().await.unwrap().index, 20);
    assert_eq!(sub.next().await.unwrap().index, 30);
    assert!(sub.next_no_block().unwrap().is_none());
}

#[tokio::test]
async fn start_index_in_the_future_waits_for_it() {
    let broker = EventBroker::spawn(BrokerConfig::default());
    publish_all(&broker, &[10]).await;

    let mut sub = broker.subscribe(SubscribeRequest::all(50)).await.unwrap();
    publish_all(&broker, &[40, 60]).await;

    let got = sub.next_no_block().unwrap().expect("index 60 should be available");
    assert_eq!(got.index, 60);
    assert!(sub.next_no_block().unwrap().is_none());
}

#[tokio::test]
async fn replay_and_live_batches_are_strictly_increasing() {
    let broker = EventBroker::spawn(BrokerConfig::default());
    publish_all(&broker, &[1, 2, 3]).await;

    let mut sub = broker.subscribe(SubscribeRequest::all(0)).await.unwrap();
    publish_all(&broker, &[4, 5]).await;

    let mut seen = Vec::new();
    while let Some(events) = sub.next_no_block().unwrap() {
        assert!(events.events.iter().all(|e| e.index == events.index));
        seen.push(events.index);
    }
    assert_eq!(seen, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn events_sharing_an_index_are_delivered_together() {
    let broker = EventBroker::spawn(BrokerConfig::default());
    let web = Job::new(DEFAULT_NAMESPACE, "web");
    let api = Job::new(DEFAULT_NAMESPACE, "api");
    broker
        .publish(Events {
            index: 12,
            events: vec![deployment_event(12, &web), deployment_event(12, &api)],
        })
        .unwrap();
    publish_all(&broker, &[13]).await;

    let mut sub = broker.subscribe(SubscribeRequest::all(0)).await.unwrap();

    let first = sub.next().await.unwrap();
    assert_eq!(first.index, 12);
    assert_eq!(first.len(), 2);
    assert_eq!(sub.next().await.unwrap().index, 13);
}

#[tokio::test]
async fn non_matching_batches_are_skipped() {
    let broker = EventBroker::spawn(BrokerConfig::default());
    publish_all(&broker, &[1]).await;

    let mut sub = broker
        .subscribe(SubscribeRequest::new(0).topic(Topic::Job, ["*"]))
        .await
        .unwrap();

    assert!(sub.next_no_block().unwrap().is_none());
    assert_eq!(sub.cursor(), 2, "cursor moves past batches it has inspected");
}

#[tokio::test]
async fn out_of_order_publish_is_rejected() {
    let broker = EventBroker::spawn(BrokerConfig::default());
    publish_all(&broker, &[10, 5, 10]).await;

    assert_eq!(broker.last_index().await.unwrap(), 10);

    let mut sub = broker.subscribe(SubscribeRequest::all(0)).await.unwrap();
    assert_eq!(sub.next_no_block().unwrap().unwrap().index, 10);
    assert!(sub.next_no_block().unwrap().is_none());
}

#[tokio::test]
async fn empty_batches_advance_last_index_only() {
    let broker = EventBroker::spawn(BrokerConfig::default());
    broker.publish(Events::new(3)).unwrap();

    assert_eq!(broker.last_index().await.unwrap(), 3);
    let stats = broker.stats().await.unwrap();
    assert_eq!(stats.buffered_batches, 0);
}

// ── Filtering ────────────────────────────────────────────────────────

#[tokio::test]
async fn topic_filters_select_subscribers() {
    let broker = EventBroker::spawn(BrokerConfig::default());

    let mut deployments = broker
        .subscribe(SubscribeRequest::new(0).topic(Topic::Deployment, ["*"]))
        .await
        .unwrap();
    let mut everything = broker
        .subscribe(SubscribeRequest::new(0).topic(Topic::All, ["*"]))
        .await
        .unwrap();
    let mut jobs = broker
        .subscribe(SubscribeRequest::new(0).topic(Topic::Job, ["*"]))
        .await
        .unwrap();

    publish_all(&broker, &[100]).await;

    let a = deployments.next_no_block().unwrap().expect("deployment subscriber");
    let b = everything.next_no_block().unwrap().expect("wildcard subscriber");
    assert_eq!(a, b);
    assert_eq!(a.events[0].topic, Topic::Deployment);
    assert!(jobs.next_no_block().unwrap().is_none());
}

#[tokio::test]
async fn key_filter_matches_job_filter_key() {
    let broker = EventBroker::spawn(BrokerConfig::default());
    let mut by_job = broker
        .subscribe(SubscribeRequest::new(0).topic(Topic::Deployment, ["web"]))
        .await
        .unwrap();
    let mut by_other = broker
        .subscribe(SubscribeRequest::new(0).topic(Topic::Deployment, ["api"]))
        .await
        .unwrap();

    publish_all(&broker, &[1]).await;

    assert!(by_job.next_no_block().unwrap().is_some());
    assert!(by_other.next_no_block().unwrap().is_none());
}

// ── Cancellation and closing ─────────────────────────────────────────

#[tokio::test]
async fn cancelled_wait_returns_promptly_and_keeps_cursor() {
    let broker = EventBroker::spawn(BrokerConfig::default());
    let mut sub = broker.subscribe(SubscribeRequest::all(5)).await.unwrap();

    let started = Instant::now();
    let err = sub
        .next_until(tokio::time::sleep(Duration::from_millis(20)))
        .await
        .expect_err("wait should be cancelled");
    assert_eq!(err, StreamError::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(sub.cursor(), 5);

    publish_all(&broker, &[6]).await;
    assert_eq!(sub.next().await.unwrap().index, 6);
}

#[tokio::test]
async fn closer_wakes_blocked_reader() {
    let broker = EventBroker::spawn(BrokerConfig::default());
    let mut sub = broker.subscribe(SubscribeRequest::all(0)).await.unwrap();
    let closer = sub.closer();

    let reader = tokio::spawn(async move { sub.next().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    closer.close();

    let result = tokio::time::timeout(Duration::from_secs(1), reader)
        .await
        .expect("reader should wake up")
        .expect("reader task should not panic");
    assert_eq!(result, Err(StreamError::Closed));
    assert!(closer.is_closed());
}

#[tokio::test]
async fn unsubscribe_is_idempotent() {
    let broker = EventBroker::spawn(BrokerConfig::default());
    publish_all(&broker, &[1]).await;
    let mut sub = broker.subscribe(SubscribeRequest::all(0)).await.unwrap();

    sub.unsubscribe();
    sub.unsubscribe();

    assert!(sub.is_closed());
    assert_eq!(sub.next_no_block(), Err(StreamError::Closed));
    assert_eq!(sub.next().await, Err(StreamError::Closed));
}

#[tokio::test]
async fn non_blocking_on_empty_open_subscription_is_not_an_error() {
    let broker = EventBroker::spawn(BrokerConfig::default());
    let mut sub = broker.subscribe(SubscribeRequest::all(0)).await.unwrap();
    assert_eq!(sub.next_no_block(), Ok(None));
}

#[tokio::test]
async fn shutdown_closes_subscriptions() {
    let broker = EventBroker::spawn(BrokerConfig::default());
    let mut sub = broker.subscribe(SubscribeRequest::all(0)).await.unwrap();

    broker.shutdown();

    let result = tokio::time::timeout(Duration::from_secs(1), sub.next())
        .await
        .expect("reader should observe shutdown");
    assert_eq!(result, Err(StreamError::Closed));
    assert_eq!(broker.last_index().await, Err(StreamError::BrokerStopped));
}

#[tokio::test]
async fn stats_track_open_subscriptions() {
    let broker = EventBroker::spawn(BrokerConfig::default());
    let mut a = broker.subscribe(SubscribeRequest::all(0)).await.unwrap();
    let _b = broker.subscribe(SubscribeRequest::all(0)).await.unwrap();
    assert_eq!(broker.stats().await.unwrap().open_subscriptions, 2);

    a.unsubscribe();
    assert_eq!(broker.stats().await.unwrap().open_subscriptions, 1);
}

// ── Buffering and lag ────────────────────────────────────────────────

#[tokio::test]
async fn lagging_subscriber_is_told_about_the_gap() {
    let broker = EventBroker::spawn(BrokerConfig {
        buffer_size: 100,
        subscriber_queue_size: 2,
    });
    let mut sub = broker.subscribe(SubscribeRequest::all(0)).await.unwrap();

    publish_all(&broker, &[1, 2, 3, 4, 5]).await;

    assert_eq!(sub.next_no_block(), Err(StreamError::Lagged { missed: 3 }));
    assert_eq!(sub.next_no_block().unwrap().unwrap().index, 4);
    assert_eq!(sub.next_no_block().unwrap().unwrap().index, 5);
    assert!(!sub.is_closed());
}

#[tokio::test]
async fn evicted_history_starts_at_oldest_buffered() {
    let broker = EventBroker::spawn(BrokerConfig {
        buffer_size: 2,
        subscriber_queue_size: 16,
    });
    publish_all(&broker, &[1, 2, 3]).await;

    let mut sub = broker.subscribe(SubscribeRequest::all(1)).await.unwrap();
    assert_eq!(sub.next().await.unwrap().index, 2);
    assert_eq!(sub.next().await.unwrap().index, 3);
}

#[tokio::test]
async fn exact_start_fails_when_history_is_evicted() {
    let broker = EventBroker::spawn(BrokerConfig {
        buffer_size: 2,
        subscriber_queue_size: 16,
    });
    publish_all(&broker, &[1, 2, 3]).await;

    let err = broker
        .subscribe(SubscribeRequest::all(1).start_exactly_at_index(true))
        .await
        .expect_err("index 1 has been evicted");
    assert_eq!(
        err,
        StreamError::IndexUnavailable {
            requested: 1,
            oldest: 2
        }
    );

    broker
        .subscribe(SubscribeRequest::all(2).start_exactly_at_index(true))
        .await
        .expect("index 2 is still buffered");
}

// ── Wire format ──────────────────────────────────────────────────────

#[test]
fn deployment_payload_omits_absent_fields() {
    let job = Job::new(DEFAULT_NAMESPACE, "web");
    let mut deployment = Deployment::new(&job);
    deployment.status = DeploymentStatus::Paused;
    let event = Event::new(
        "DeploymentStatusUpdate",
        deployment.id.clone(),
        DEFAULT_NAMESPACE,
        100,
        EventPayload::Deployment(DeploymentEvent {
            deployment,
            job: None,
            eval: None,
        }),
    );

    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["topic"], "Deployment");
    assert_eq!(value["type"], "DeploymentStatusUpdate");
    assert_eq!(value["index"], 100);
    assert_eq!(value["payload"]["deployment"]["status"], "paused");
    assert!(value["payload"].get("job").is_none());
    assert!(value["payload"].get("eval").is_none());
    assert!(value.get("filter_keys").is_none());

    let restored: Event = serde_json::from_value(value).unwrap();
    assert_eq!(restored, event);
}

#[test]
fn topic_parses_wildcard() {
    assert_eq!("*".parse::<Topic>().unwrap(), Topic::All);
    assert_eq!("Deployment".parse::<Topic>().unwrap(), Topic::Deployment);
    assert!("deployment".parse::<Topic>().is_err());
    assert_eq!(serde_json::to_string(&Topic::All).unwrap(), "\"*\"");
}
