//! Recovery policy tests through the public API
//!
//! Uses the counting mock connector, so no broker is needed:
//! - A `#` in the topic is retried once, sanitized, at QoS 1
//! - Wildcards in a payload alone are published verbatim
//! - Sessions opened always equal sessions closed after failures


use mqtt_logging::protocol::{PublishOutcome, QosLevel};
use mqtt_logging::testing::MockConnector;
use mqtt_logging::{BrokerEndpoint, DirectPublisher};
use std::sync::Arc;
use test_helpers::{mock_factory, test_config};
use tracing::Level;

fn direct_publisher(mock: &MockConnector) -> DirectPublisher {
    DirectPublisher::new(
        Arc::new(mock.clone()),
        BrokerEndpoint::new("localhost", 1883),
        "DVT",
    )
}

#[test]
fn test_hash_in_logger_topic_is_retried_sanitized() {
    let mock = MockConnector::new();
    let factory = mock_factory(test_config("DVT"), &mock);
    let logger = factory
        .make_logger("rig#7", &factory.destinations(false), Level::INFO)
        .unwrap();

    logger.info("slot #3 ready");
    logger.flush();

    // Only the sanitized message reached the broker
    let published = mock.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "DVT/rig_7/log");
    assert!(published[0].payload.ends_with("slot _3 ready"));
    assert_eq!(published[0].qos, QosLevel::AtLeastOnce);
    assert!(published[0].retain);

    // One rejected attempt plus the retry
    assert_eq!(mock.publish_attempts(), 2);
}

#[tokio::test]
async fn test_post_with_payload_wildcard_is_verbatim() {
    let mock = MockConnector::new();
    let publisher = direct_publisher(&mock);

    let outcome = publisher.post("metrics", "cpu+load", false).await;

    assert_eq!(outcome, PublishOutcome::Delivered);
    let published = mock.published_on("DVT/metrics");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].payload, "cpu+load");
    assert_eq!(published[0].qos, QosLevel::AtMostOnce);
}

#[tokio::test]
async fn test_post_with_topic_wildcard_sanitizes_both() {
    let mock = MockConnector::new();
    let publisher = direct_publisher(&mock);

    let outcome = publisher.post("metrics/+", "cpu+load", true).await;

    assert_eq!(outcome, PublishOutcome::DeliveredSanitized);
    let published = mock.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "DVT/metrics/_");
    assert_eq!(published[0].payload, "cpu_load");
    assert_eq!(published[0].qos, QosLevel::AtLeastOnce);
    assert!(published[0].retain);
}

#[tokio::test]
async fn test_failed_retry_does_not_poison_publisher() {
    let mock = MockConnector::new();
    let publisher = direct_publisher(&mock);

    // Retry and error report both fail
    mock.set_fail_publish(true);
    let outcome = publisher.post("a#b", "x", false).await;
    assert_eq!(outcome, PublishOutcome::Dropped);

    mock.set_fail_publish(false);
    mock.clear_history();
    let outcome = publisher.post("ok", "x", false).await;
    assert_eq!(outcome, PublishOutcome::Delivered);
    assert!(mock.published_on("DVT/error").is_empty());
}

#[test]
fn test_sessions_balance_after_repeated_failures() {
    const CYCLES: usize = 10;

    let mock = MockConnector::with_publish_failure();
    let factory = mock_factory(test_config("DVT"), &mock);
    let logger = factory
        .make_logger("bench.rig", &factory.destinations(false), Level::INFO)
        .unwrap();

    for i in 0..CYCLES {
        logger.error(format!("failure {i}"));
    }
    logger.flush();

    // Each cycle opens one session for the record and one for the report
    assert_eq!(mock.opened(), CYCLES * 2);
    assert_eq!(mock.opened(), mock.closed());
    assert!(mock.published().is_empty());
}
