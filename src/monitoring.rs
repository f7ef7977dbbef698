//! Internal monitoring messages.
//!
//! Diagnostics such as cross-tab session inconsistencies are reported here.
//! They are informational and never interrupt the session protocol.

use serde_json::Value;
use std::cell::RefCell;

/// A diagnostic message and its structured context.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoringMessage {
    pub message: String,
    pub context: Value,
}

/// Receives monitoring messages.
pub trait MonitoringSink {
    fn add_message(&self, message: &str, context: Value);
}

/// Keeps every message in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: RefCell<Vec<MonitoringMessage>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<MonitoringMessage> {
        self.messages.borrow().clone()
    }

    pub fn take(&self) -> Vec<MonitoringMessage> {
        std::mem::take(&mut *self.messages.borrow_mut())
    }
}

impl MonitoringSink for MemorySink {
    fn add_message(&self, message: &str, context: Value) {
        self.messages.borrow_mut().push(MonitoringMessage {
            message: message.to_string(),
            context,
        });
    }
}
