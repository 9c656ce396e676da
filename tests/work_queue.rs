use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fanwork::broker::{BrokerClient, Delivery, MemoryBroker, MemorySession, Prefetch};
use fanwork::dispatcher::{DeliveryDispatcher, ShutdownKind};
use fanwork::handler::{HandlerFn, Outcome, SimulatedWork};
use fanwork::publisher::Publisher;
use fanwork::topology::{
    DEFAULT_WORK_QUEUE, PublishTarget, QueueHandle, TopologyDescriptor, TopologyManager,
};
use tokio::sync::Notify;
use tokio::time::Instant;

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(30), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn worker_session(broker: &MemoryBroker) -> (Arc<MemorySession>, QueueHandle) {
    let session = Arc::new(broker.session().unwrap());
    let queue = TopologyManager::new(Arc::clone(&session))
        .declare(&TopologyDescriptor::work_queue(DEFAULT_WORK_QUEUE))
        .await
        .unwrap();
    (session, queue)
}

async fn producer(broker: &MemoryBroker) -> (Publisher<MemorySession>, PublishTarget) {
    let session = Arc::new(broker.session().unwrap());
    let target = TopologyManager::new(Arc::clone(&session))
        .prepare_publisher(&TopologyDescriptor::work_queue(DEFAULT_WORK_QUEUE))
        .await
        .unwrap();
    (Publisher::new(session), target)
}

fn drained(broker: &MemoryBroker) -> bool {
    broker.ready_count(DEFAULT_WORK_QUEUE) == Some(0) && broker.unacked_count(DEFAULT_WORK_QUEUE) == 0
}

#[tokio::test(start_paused = true)]
async fn dotted_task_takes_two_units_then_is_acked() {
    let broker = MemoryBroker::new();
    let (session, queue) = worker_session(&broker).await;
    let (publisher, target) = producer(&broker).await;

    publisher.publish("a.b.c", &target).await.unwrap();
    assert_eq!(session.queue_depth(&queue.name).await.unwrap(), 1);

    let dispatcher = DeliveryDispatcher::new(Arc::clone(&session));
    let shutdown = dispatcher.shutdown_token();
    let start = Instant::now();
    let run = tokio::spawn(async move {
        dispatcher
            .run(&queue, Prefetch::from_count(1), Arc::new(SimulatedWork::default()))
            .await
    });

    wait_until(|| drained(&broker)).await;
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(2), "finished after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(2100), "finished after {elapsed:?}");

    let (probe, _) = worker_session(&broker).await;
    assert_eq!(probe.queue_depth(DEFAULT_WORK_QUEUE).await.unwrap(), 0);

    shutdown.cancel();
    let report = run.await.unwrap().unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(report.acked, 1);
    assert_eq!(report.shutdown, ShutdownKind::Clean);
}

#[tokio::test]
async fn competing_workers_process_each_task_exactly_once() {
    let broker = MemoryBroker::new();
    let processed: Arc<Mutex<HashMap<String, usize>>> = Arc::default();
    let overlap = Arc::new(AtomicUsize::new(0));

    let mut runs = Vec::new();
    let mut tokens = Vec::new();
    for _ in 0..3 {
        let (session, queue) = worker_session(&broker).await;
        let in_flight = Arc::new(AtomicUsize::new(0));
        let (seen, overlap) = (Arc::clone(&processed), Arc::clone(&overlap));
        let handler = Arc::new(HandlerFn::new(move |d: Delivery| {
            let (seen, overlap, in_flight) =
                (Arc::clone(&seen), Arc::clone(&overlap), Arc::clone(&in_flight));
            async move {
                if in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlap.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
                *seen.lock().unwrap().entry(d.text().into_owned()).or_default() += 1;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Outcome::Success
            }
        }));

        let dispatcher = DeliveryDispatcher::new(session);
        tokens.push(dispatcher.shutdown_token());
        runs.push(tokio::spawn(async move {
            dispatcher.run(&queue, Prefetch::from_count(1), handler).await
        }));
    }

    let (publisher, target) = producer(&broker).await;
    for i in 0..12 {
        publisher.publish(format!("task {i}."), &target).await.unwrap();
    }

    wait_until(|| processed.lock().unwrap().len() == 12 && drained(&broker)).await;
    tokens.iter().for_each(|t| t.cancel());

    let mut acked = 0;
    for run in runs {
        let report = run.await.unwrap().unwrap();
        assert_eq!(report.requeued, 0);
        acked += report.acked;
    }
    assert_eq!(acked, 12);
    assert_eq!(overlap.load(Ordering::SeqCst), 0, "a worker held two tasks at once");
    assert!(processed.lock().unwrap().values().all(|count| *count == 1));
}

#[tokio::test]
async fn task_failed_by_one_worker_is_completed_by_another() {
    let broker = MemoryBroker::new();
    let completed_by = Arc::new(Mutex::new(Vec::<String>::new()));

    let mut tokens = Vec::new();
    let mut runs = Vec::new();
    for (name, healthy) in [("broken", false), ("healthy", true)] {
        let (session, queue) = worker_session(&broker).await;
        let log = Arc::clone(&completed_by);
        let handler = Arc::new(HandlerFn::new(move |d: Delivery| {
            let log = Arc::clone(&log);
            async move {
                if !healthy {
                    return Outcome::failure("disk full");
                }
                log.lock().unwrap().push(format!("{name}:{}", d.text()));
                Outcome::Success
            }
        }));
        let dispatcher = DeliveryDispatcher::new(session);
        tokens.push(dispatcher.shutdown_token());
        runs.push(tokio::spawn(async move {
            dispatcher.run(&queue, Prefetch::from_count(1), handler).await
        }));
    }

    let (publisher, target) = producer(&broker).await;
    publisher.publish("important", &target).await.unwrap();

    wait_until(|| !completed_by.lock().unwrap().is_empty() && drained(&broker)).await;
    tokens.iter().for_each(|t| t.cancel());

    let mut failed = 0;
    let mut acked = 0;
    for run in runs {
        let report = run.await.unwrap().unwrap();
        failed += report.failed;
        acked += report.acked;
    }
    assert_eq!(*completed_by.lock().unwrap(), vec!["healthy:important".to_string()]);
    assert_eq!(acked, 1);
    assert!(failed <= 1);
}

#[tokio::test]
async fn busy_worker_does_not_build_a_backlog() {
    let broker = MemoryBroker::new();

    let release = Arc::new(Notify::new());
    let slow_received = Arc::new(AtomicUsize::new(0));
    let fast_received = Arc::new(AtomicUsize::new(0));

    let (slow_session, slow_queue) = worker_session(&broker).await;
    let (gate, count) = (Arc::clone(&release), Arc::clone(&slow_received));
    let slow = Arc::new(HandlerFn::new(move |_d: Delivery| {
        let (gate, count) = (Arc::clone(&gate), Arc::clone(&count));
        async move {
            count.fetch_add(1, Ordering::SeqCst);
            gate.notified().await;
            Outcome::Success
        }
    }));

    let (fast_session, fast_queue) = worker_session(&broker).await;
    let count = Arc::clone(&fast_received);
    let fast = Arc::new(HandlerFn::new(move |_d: Delivery| {
        let count = Arc::clone(&count);
        async move {
            count.fetch_add(1, Ordering::SeqCst);
            Outcome::Success
        }
    }));

    let slow_dispatcher = DeliveryDispatcher::new(slow_session);
    let fast_dispatcher = DeliveryDispatcher::new(fast_session);
    let tokens = [slow_dispatcher.shutdown_token(), fast_dispatcher.shutdown_token()];
    let slow_run = tokio::spawn(async move {
        slow_dispatcher
            .run(&slow_queue, Prefetch::from_count(1), slow)
            .await
    });
    let fast_run = tokio::spawn(async move {
        fast_dispatcher
            .run(&fast_queue, Prefetch::from_count(1), fast)
            .await
    });

    let (publisher, target) = producer(&broker).await;
    for i in 0..6 {
        publisher.publish(format!("job {i}"), &target).await.unwrap();
    }

    wait_until(|| broker.ready_count(DEFAULT_WORK_QUEUE) == Some(0) && broker.unacked_count(DEFAULT_WORK_QUEUE) == 1)
        .await;
    assert_eq!(slow_received.load(Ordering::SeqCst), 1);
    assert_eq!(fast_received.load(Ordering::SeqCst), 5);

    release.notify_waiters();
    wait_until(|| drained(&broker)).await;
    tokens.iter().for_each(|t| t.cancel());

    assert_eq!(slow_run.await.unwrap().unwrap().acked, 1);
    assert_eq!(fast_run.await.unwrap().unwrap().acked, 5);
}

#[tokio::test]
async fn worker_loss_returns_unacked_task_to_the_queue() {
    let broker = MemoryBroker::new();
    let (session, queue) = worker_session(&broker).await;
    let (publisher, target) = producer(&broker).await;
    publisher.publish("survive me", &target).await.unwrap();

    let mut deliveries = session.consume(&queue.name, "doomed").await.unwrap();
    let first = futures::StreamExt::next(&mut deliveries).await.unwrap().unwrap();
    assert!(!first.redelivered);
    assert_eq!(broker.unacked_count(DEFAULT_WORK_QUEUE), 1);

    drop(deliveries);
    drop(session);

    let (replacement, queue) = worker_session(&broker).await;
    let mut deliveries = replacement.consume(&queue.name, "heir").await.unwrap();
    let again = futures::StreamExt::next(&mut deliveries).await.unwrap().unwrap();
    assert!(again.redelivered);
    assert_eq!(again.text(), "survive me");
    replacement.ack(again.tag).await.unwrap();
    assert!(drained(&broker));
}
