//! End-to-end tests: commits against an on-disk store produce events on
//! the broker.

use statewatch_db::{create_pool, run_migrations, DbRuntimeSettings};
use statewatch_state::{
    ChangeSet, DeploymentStatusUpdateRequest, EventDeriver, EventPublisher, MsgType, ReadTxn,
    StateError, StateStore,
};
use statewatch_stream::{BrokerConfig, Event, EventBroker, SubscribeRequest, Topic};
use statewatch_types::{
    Deployment, DeploymentStatus, DeploymentStatusUpdate, Evaluation, Job, DEFAULT_NAMESPACE,
    DEPLOYMENT_STATUS_DESCRIPTION_PAUSED, EVAL_TRIGGER_DEPLOYMENT_WATCHER,
    EVAL_TRIGGER_JOB_REGISTER,
};
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    store: StateStore,
    broker: EventBroker,
}

fn harness_with(configure: impl FnOnce(&mut EventPublisher)) -> Harness {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.db");
    let pool = create_pool(path.to_str().unwrap(), DbRuntimeSettings::default()).unwrap();
    run_migrations(&pool.get().unwrap()).unwrap();

    let broker = EventBroker::spawn(BrokerConfig::default());
    let mut publisher = EventPublisher::with_default_derivers(broker.clone());
    configure(&mut publisher);

    Harness {
        _dir: dir,
        store: StateStore::with_publisher(pool, publisher),
        broker,
    }
}

fn harness() -> Harness {
    harness_with(|_| {})
}

/// Registers `web` at index 10 and starts a deployment for it at index 20.
fn seed(h: &Harness) -> (Job, Deployment) {
    let (_, job) = h
        .store
        .commit_at(10, MsgType::JobRegister, |txn| {
            txn.upsert_job(Job::new(DEFAULT_NAMESPACE, "web"))
        })
        .unwrap();
    let (_, deployment) = h
        .store
        .commit_at(20, MsgType::DeploymentUpsert, |txn| {
            txn.upsert_deployment(Deployment::new(&job))
        })
        .unwrap();
    (job, deployment)
}

fn pause_request(deployment: &Deployment) -> DeploymentStatusUpdateRequest {
    DeploymentStatusUpdateRequest {
        update: DeploymentStatusUpdate {
            deployment_id: deployment.id.clone(),
            status: DeploymentStatus::Paused,
            status_description: DEPLOYMENT_STATUS_DESCRIPTION_PAUSED.to_string(),
        },
        job: None,
        eval: None,
    }
}

#[tokio::test]
async fn status_update_at_index_100_is_enriched_with_job() {
    let h = harness();
    let (job, deployment) = seed(&h);
    let mut deployments = h
        .broker
        .subscribe(SubscribeRequest::new(100).topic(Topic::Deployment, ["*"]))
        .await
        .unwrap();
    let mut jobs = h
        .broker
        .subscribe(SubscribeRequest::new(100).topic(Topic::Job, ["*"]))
        .await
        .unwrap();

    // The request carries the evaluation but not the job.
    let mut eval = Evaluation::new(&job, EVAL_TRIGGER_DEPLOYMENT_WATCHER);
    eval.deployment_id = Some(deployment.id.clone());
    let mut request = pause_request(&deployment);
    request.eval = Some(eval.clone());

    h.store
        .commit_at(100, MsgType::DeploymentStatusUpdate, |txn| {
            txn.update_deployment_status(request)
        })
        .unwrap();

    let batch = deployments.next().await.unwrap();
    assert_eq!(batch.index, 100);
    assert_eq!(batch.len(), 1);

    let event = &batch.events[0];
    assert_eq!(event.topic, Topic::Deployment);
    assert_eq!(event.key, deployment.id);
    assert_eq!(event.event_type, "DeploymentStatusUpdate");
    assert_eq!(event.filter_keys, vec!["web".to_string()]);

    let payload = event.payload.as_deployment().unwrap();
    assert_eq!(payload.deployment.status, DeploymentStatus::Paused);
    assert_eq!(payload.deployment.modify_index, 100);
    assert_eq!(payload.job.as_ref(), Some(&job));
    let attached = payload.eval.as_ref().unwrap();
    assert_eq!(attached.id, eval.id);
    assert_eq!(attached.modify_index, 100);

    assert_eq!(h.broker.last_index().await.unwrap(), 100);
    assert!(jobs.next_no_block().unwrap().is_none());
}

#[tokio::test]
async fn status_update_with_eval_carries_it() {
    let h = harness();
    let (job, deployment) = seed(&h);
    let mut sub = h.broker.subscribe(SubscribeRequest::all(21)).await.unwrap();

    let mut eval = Evaluation::new(&job, EVAL_TRIGGER_DEPLOYMENT_WATCHER);
    eval.deployment_id = Some(deployment.id.clone());
    let mut request = pause_request(&deployment);
    request.eval = Some(eval.clone());
    let (index, _) = h.store.update_deployment_status(request).unwrap();

    let batch = sub.next().await.unwrap();
    assert_eq!(batch.index, index);

    let topics: Vec<_> = batch.events.iter().map(|e| e.topic).collect();
    assert_eq!(topics, vec![Topic::Deployment, Topic::Evaluation]);

    let payload = batch.events[0].payload.as_deployment().unwrap();
    assert_eq!(payload.eval.as_ref().map(|e| e.id.as_str()), Some(eval.id.as_str()));
    assert_eq!(batch.events[1].filter_keys, vec!["web".to_string(), deployment.id.clone()]);
}

#[tokio::test]
async fn job_only_commit_yields_no_deployment_events() {
    let h = harness();
    let mut deployments = h
        .broker
        .subscribe(SubscribeRequest::new(0).topic(Topic::Deployment, ["*"]))
        .await
        .unwrap();
    let mut everything = h.broker.subscribe(SubscribeRequest::all(0)).await.unwrap();

    let job = Job::new(DEFAULT_NAMESPACE, "web");
    let eval = Evaluation::new(&job, EVAL_TRIGGER_JOB_REGISTER);
    let (index, _) = h.store.upsert_job(job, Some(eval)).unwrap();
    h.broker.last_index().await.unwrap();

    assert!(deployments.next_no_block().unwrap().is_none());

    let batch = everything.next_no_block().unwrap().unwrap();
    assert_eq!(batch.index, index);
    let topics: Vec<_> = batch.events.iter().map(|e| e.topic).collect();
    assert_eq!(topics, vec![Topic::Job, Topic::Evaluation]);
}

#[tokio::test]
async fn job_deregister_reports_deleted_job() {
    let h = harness();
    let (job, _) = seed(&h);
    let mut sub = h
        .broker
        .subscribe(SubscribeRequest::new(21).topic(Topic::Job, ["web"]))
        .await
        .unwrap();

    h.store.delete_job(DEFAULT_NAMESPACE, "web").unwrap();

    let batch = sub.next().await.unwrap();
    let event = &batch.events[0];
    assert_eq!(event.event_type, "JobDeregister");
    assert_eq!(event.payload.as_job().map(|p| &p.job), Some(&job));
    assert!(h.store.job_by_id(DEFAULT_NAMESPACE, "web").unwrap().is_none());
}

#[tokio::test]
async fn subscriber_resumes_from_history() {
    let h = harness();
    for name in ["a", "b", "c"] {
        h.store.upsert_job(Job::new(DEFAULT_NAMESPACE, name), None).unwrap();
    }

    let mut sub = h.broker.subscribe(SubscribeRequest::all(2)).await.unwrap();

    let indices = [sub.next().await.unwrap().index, sub.next().await.unwrap().index];
    assert_eq!(indices, [2, 3]);
    assert!(sub.next_no_block().unwrap().is_none());
}

#[tokio::test]
async fn stale_commit_index_is_rejected() {
    let h = harness();
    seed(&h);

    let err = h
        .store
        .commit_at(20, MsgType::JobRegister, |txn| {
            txn.upsert_job(Job::new(DEFAULT_NAMESPACE, "api"))
        })
        .unwrap_err();

    assert!(matches!(err, StateError::StaleIndex { index: 20, latest: 20 }));
    assert!(h.store.job_by_id(DEFAULT_NAMESPACE, "api").unwrap().is_none());
    assert_eq!(h.store.latest_index().unwrap(), 20);
}

struct BrokenDeriver;

impl EventDeriver for BrokenDeriver {
    fn topic(&self) -> Topic {
        Topic::Job
    }

    fn derive(&self, _txn: &dyn ReadTxn, changes: &ChangeSet) -> Result<Vec<Event>, StateError> {
        Err(StateError::NotFound {
            entity: "job",
            id: format!("index-{}", changes.index),
        })
    }
}

#[tokio::test]
async fn failed_derivation_rolls_back_commit() {
    let h = harness_with(|publisher| publisher.register(BrokenDeriver));

    let err = h
        .store
        .upsert_job(Job::new(DEFAULT_NAMESPACE, "web"), None)
        .unwrap_err();

    assert!(matches!(err, StateError::Derive { topic: Topic::Job, .. }));
    assert_eq!(h.store.latest_index().unwrap(), 0);
    assert!(h.store.job_by_id(DEFAULT_NAMESPACE, "web").unwrap().is_none());
    assert_eq!(h.broker.last_index().await.unwrap(), 0);
}

#[tokio::test]
async fn lookups_list_job_children() {
    let h = harness();
    let (job, first) = seed(&h);
    let (_, second) = h.store.upsert_deployment(Deployment::new(&job)).unwrap();
    h.store
        .upsert_evals(vec![Evaluation::new(&job, EVAL_TRIGGER_JOB_REGISTER)])
        .unwrap();

    let ids: Vec<_> = h
        .store
        .deployments_by_job(DEFAULT_NAMESPACE, "web")
        .unwrap()
        .into_iter()
        .map(|d| d.id)
        .collect();
    assert_eq!(ids, vec![first.id.clone(), second.id]);
    assert_eq!(h.store.evals_by_job(DEFAULT_NAMESPACE, "web").unwrap().len(), 1);
    assert!(h.store.deployment_by_id(&first.id).unwrap().is_some());
}

#[tokio::test]
async fn deleting_a_deployment_publishes_no_deployment_event() {
    let h = harness();
    let (_, deployment) = seed(&h);
    let mut sub = h.broker.subscribe(SubscribeRequest::all(21)).await.unwrap();

    let (index, _) = h.store.delete_deployment(&deployment.id).unwrap();
    assert_eq!(h.broker.last_index().await.unwrap(), index);

    assert!(sub.next_no_block().unwrap().is_none());
    assert!(matches!(
        h.store.delete_deployment(&deployment.id),
        Err(StateError::NotFound { .. })
    ));
}
