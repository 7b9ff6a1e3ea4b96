//! Mock implementations for testing
//!
//! [`MockConnector`] stands in for a broker. It counts every session it opens
//! and closes, records every message a session accepted, and can be told to
//! fail connects or publishes.

use crate::protocol::{OutboundMessage, TopicBuilder};
use crate::transport::{BrokerConnector, BrokerEndpoint, BrokerSession, MqttError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct MockState {
    opened: AtomicUsize,
    closed: AtomicUsize,
    publish_attempts: AtomicUsize,
    fail_connect: AtomicBool,
    fail_publish: AtomicBool,
    published: Mutex<Vec<OutboundMessage>>,
}

/// Counting broker stand-in
///
/// Clones share state, so a test can keep one handle while the code under
/// test owns another.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connect attempt fails with `ConnectionFailed`
    pub fn with_connect_failure() -> Self {
        let mock = Self::default();
        mock.set_fail_connect(true);
        mock
    }

    /// Connects succeed, every publish fails with `PublishFailed`
    pub fn with_publish_failure() -> Self {
        let mock = Self::default();
        mock.set_fail_publish(true);
        mock
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.state.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Sessions successfully opened
    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Sessions closed, counted once per session
    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Publish calls seen, including rejected ones
    pub fn publish_attempts(&self) -> usize {
        self.state.publish_attempts.load(Ordering::SeqCst)
    }

    /// Messages the mock broker accepted, in order
    pub fn published(&self) -> Vec<OutboundMessage> {
        self.state
            .published
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Accepted messages on one topic
    pub fn published_on(&self, topic: &str) -> Vec<OutboundMessage> {
        self.published()
            .into_iter()
            .filter(|m| m.topic == topic)
            .collect()
    }

    pub fn clear_history(&self) {
        if let Ok(mut published) = self.state.published.lock() {
            published.clear();
        }
        self.state.publish_attempts.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrokerConnector for MockConnector {
    async fn connect(&self, _endpoint: &BrokerEndpoint) -> Result<Box<dyn BrokerSession>, MqttError> {
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(MqttError::ConnectionFailed(
                "Mock connector configured to fail".into(),
            ));
        }

        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            state: Arc::clone(&self.state),
            connected: true,
        }))
    }
}

/// Session handed out by [`MockConnector`]
#[derive(Debug)]
pub struct MockSession {
    state: Arc<MockState>,
    connected: bool,
}

#[async_trait]
impl BrokerSession for MockSession {
    async fn publish(&mut self, message: &OutboundMessage) -> Result<(), MqttError> {
        self.state.publish_attempts.fetch_add(1, Ordering::SeqCst);

        if !self.connected {
            return Err(MqttError::SessionClosed);
        }
        // Same rejection a real client applies before sending
        if TopicBuilder::has_wildcard(&message.topic) {
            return Err(MqttError::InvalidTopic(message.topic.clone()));
        }
        if self.state.fail_publish.load(Ordering::SeqCst) {
            return Err(MqttError::PublishFailed(
                "Mock session configured to fail".into(),
            ));
        }

        if let Ok(mut published) = self.state.published.lock() {
            published.push(message.clone());
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), MqttError> {
        if self.connected {
            self.connected = false;
            self.state.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
