use std::sync::Arc;

use super::*;
use crate::broker::{BrokerClient, Message, MemoryBroker, PublishOptions};
use crate::utils::error::BrokerError;

#[test]
fn test_fanout_descriptor_shape() {
    let descriptor = TopologyDescriptor::fanout(DEFAULT_FANOUT_EXCHANGE);
    assert_eq!(descriptor.pattern(), Pattern::Broadcast);
    assert_eq!(descriptor.queue, QueueName::BrokerGenerated);
    assert!(descriptor.exclusive && descriptor.auto_delete && !descriptor.durable);

    let target = descriptor.publish_target().unwrap();
    assert_eq!(target.exchange, "logs");
    assert_eq!(target.routing_key, "");
    assert!(!target.persistent);
    assert!(!target.mandatory);
}

#[test]
fn test_work_queue_descriptor_shape() {
    let descriptor = TopologyDescriptor::work_queue(DEFAULT_WORK_QUEUE);
    assert_eq!(descriptor.pattern(), Pattern::WorkQueue);
    assert!(descriptor.durable && !descriptor.exclusive && !descriptor.auto_delete);

    let target = descriptor.publish_target().unwrap();
    assert_eq!(target.exchange, "");
    assert_eq!(target.routing_key, "work_queues");
    assert!(target.persistent);
    assert!(target.mandatory);
}

#[test]
fn test_unnamed_work_queue_is_rejected() {
    let mut descriptor = TopologyDescriptor::work_queue("jobs");
    descriptor.queue = QueueName::BrokerGenerated;
    assert!(matches!(
        descriptor.publish_target(),
        Err(BrokerError::TopologyConflict(_))
    ));
}

#[tokio::test]
async fn test_declare_fanout_binds_private_queue() {
    let broker = MemoryBroker::new();
    let session = Arc::new(broker.session().unwrap());
    let topology = TopologyManager::new(Arc::clone(&session));

    let handle = topology
        .declare(&TopologyDescriptor::fanout("logs"))
        .await
        .unwrap();
    assert!(handle.name.starts_with("amq.gen-"));
    assert_eq!(handle.pattern, Pattern::Broadcast);

    session
        .publish("logs", "", &Message::new("hi"), PublishOptions::default())
        .await
        .unwrap();
    assert_eq!(broker.ready_count(&handle.name), Some(1));
}

#[tokio::test]
async fn test_each_subscriber_gets_distinct_queue() {
    let broker = MemoryBroker::new();
    let descriptor = TopologyDescriptor::fanout("logs");

    let a = Arc::new(broker.session().unwrap());
    let b = Arc::new(broker.session().unwrap());
    let qa = TopologyManager::new(a).declare(&descriptor).await.unwrap();
    let qb = TopologyManager::new(b).declare(&descriptor).await.unwrap();

    assert_ne!(qa.name, qb.name);
}

#[tokio::test]
async fn test_fanout_queue_vanishes_with_session() {
    let broker = MemoryBroker::new();
    let session = Arc::new(broker.session().unwrap());
    let handle = TopologyManager::new(Arc::clone(&session))
        .declare(&TopologyDescriptor::fanout("logs"))
        .await
        .unwrap();
    assert!(broker.has_queue(&handle.name));

    session.close().await.unwrap();
    assert!(!broker.has_queue(&handle.name));
}

#[tokio::test]
async fn test_producer_and_consumer_declare_independently() {
    let broker = MemoryBroker::new();
    let descriptor = TopologyDescriptor::work_queue("work_queues");

    let producer = TopologyManager::new(Arc::new(broker.session().unwrap()));
    let target = producer.prepare_publisher(&descriptor).await.unwrap();
    assert_eq!(target.routing_key, "work_queues");

    let consumer = TopologyManager::new(Arc::new(broker.session().unwrap()));
    let handle = consumer.declare(&descriptor).await.unwrap();
    assert_eq!(handle.name, "work_queues");
    assert_eq!(handle.pattern, Pattern::WorkQueue);

    // Second declaration from the producer side is still fine.
    producer.prepare_publisher(&descriptor).await.unwrap();
}

#[tokio::test]
async fn test_conflicting_work_queue_declaration_fails() {
    let broker = MemoryBroker::new();
    let topology = TopologyManager::new(Arc::new(broker.session().unwrap()));
    topology
        .declare(&TopologyDescriptor::work_queue("jobs"))
        .await
        .unwrap();

    let mut transient = TopologyDescriptor::work_queue("jobs");
    transient.durable = false;
    let err = topology.declare(&transient).await.unwrap_err();
    assert!(matches!(err, BrokerError::TopologyConflict(_)));
}

#[tokio::test]
async fn test_exchange_kind_conflict() {
    let broker = MemoryBroker::new();
    let topology = TopologyManager::new(Arc::new(broker.session().unwrap()));
    topology
        .prepare_publisher(&TopologyDescriptor::fanout("logs"))
        .await
        .unwrap();

    let mut direct = TopologyDescriptor::fanout("logs");
    direct.kind = ExchangeKind::Direct;
    let err = topology.prepare_publisher(&direct).await.unwrap_err();
    assert!(matches!(err, BrokerError::TopologyConflict(_)));
}

#[tokio::test]
async fn test_topology_manager_over_trait_object() {
    let broker = MemoryBroker::new();
    let session: Arc<dyn BrokerClient> = Arc::new(broker.session().unwrap());
    let handle = TopologyManager::new(session)
        .declare(&TopologyDescriptor::work_queue("jobs"))
        .await
        .unwrap();
    assert_eq!(handle.name, "jobs");
}
