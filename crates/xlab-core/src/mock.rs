//! Scripted mock interface.
//!
//! [`MockInterface`] answers queries from a reply table and records every
//! message written to it. Drivers are tested against it, the mock backend
//! serves it, and the CLI can run against it without hardware.
//!
//! ```rust,ignore
//! let mock = MockInterface::new("visa", "USB0::1::INSTR")
//!     .with_identity("Agilent Technologies,34405A,MY123,1.0")
//!     .with_reply("MEASURE:VOLTAGE:DC? AUTO,DEF", "+1.2345E+00");
//!
//! let dmm = A34xxx::a34405(Arc::new(mock.clone()));
//! assert_eq!(dmm.measure_voltage_dc(Param::Auto, Param::Def, 1).await?, 1.2345);
//! assert_eq!(mock.written(), vec!["MEASURE:VOLTAGE:DC? AUTO,DEF"]);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use crate::error::{Result, XlabError};
use crate::interface::{Interface, DEFAULT_TIMEOUT};

#[derive(Debug, Default)]
struct Script {
    replies: HashMap<String, String>,
    queued: HashMap<String, VecDeque<String>>,
    raw: HashMap<String, Vec<u8>>,
    written: Vec<String>,
    timeout: Option<Duration>,
}

/// Interface that replies from a script. Clones share the same script.
#[derive(Debug, Clone)]
pub struct MockInterface {
    backend: String,
    resource: String,
    identity: String,
    messages: bool,
    script: Arc<Mutex<Script>>,
}

impl MockInterface {
    /// Message based mock with an empty script.
    pub fn new(backend: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            resource: resource.into(),
            identity: String::new(),
            messages: true,
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    /// Mock of a serial interface: identifies by description and refuses
    /// messages.
    pub fn serial(port: &str, description: &str) -> Self {
        let mut mock = Self::new("serialport", format!("{}:{}", port, description));
        mock.identity = description.to_string();
        mock.messages = false;
        mock
    }

    /// Identity returned by `identify()`.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    /// Reply returned every time `query` is asked.
    pub fn with_reply(self, query: impl Into<String>, reply: impl Into<String>) -> Self {
        self.lock().replies.insert(query.into(), reply.into());
        self
    }

    /// Raw block reply returned every time `query` is asked with `query_raw`.
    pub fn with_raw_reply(self, query: impl Into<String>, reply: impl Into<Vec<u8>>) -> Self {
        self.lock().raw.insert(query.into(), reply.into());
        self
    }

    /// One-shot reply, used before the persistent reply for the same query.
    pub fn push_reply(&self, query: impl Into<String>, reply: impl Into<String>) {
        self.lock()
            .queued
            .entry(query.into())
            .or_default()
            .push_back(reply.into());
    }

    /// Every message written so far, commands and queries, in order.
    pub fn written(&self) -> Vec<String> {
        self.lock().written.clone()
    }

    /// Forget the recorded messages.
    pub fn clear_written(&self) {
        self.lock().written.clear();
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_messages(&self) -> Result<()> {
        if self.messages {
            Ok(())
        } else {
            Err(XlabError::Unsupported(format!(
                "{} carries no messages",
                self.interface_id()
            )))
        }
    }
}

#[async_trait]
impl Interface for MockInterface {
    fn backend(&self) -> &str {
        &self.backend
    }

    fn resource(&self) -> &str {
        &self.resource
    }

    async fn identify(&self) -> Result<String> {
        Ok(self.identity.clone())
    }

    async fn command(&self, data: &str) -> Result<()> {
        self.check_messages()?;
        trace!(data, "mock command");
        self.lock().written.push(data.to_string());
        Ok(())
    }

    async fn query(&self, query: &str) -> Result<String> {
        self.check_messages()?;
        let mut script = self.lock();
        script.written.push(query.to_string());

        if let Some(reply) = script.queued.get_mut(query).and_then(|q| q.pop_front()) {
            return Ok(reply);
        }
        script
            .replies
            .get(query)
            .cloned()
            .ok_or_else(|| XlabError::Timeout(format!("no reply scripted for '{}'", query)))
    }

    async fn query_raw(&self, query: &str) -> Result<Vec<u8>> {
        self.check_messages()?;
        let mut script = self.lock();
        script.written.push(query.to_string());
        script
            .raw
            .get(query)
            .cloned()
            .ok_or_else(|| XlabError::Timeout(format!("no raw reply scripted for '{}'", query)))
    }

    fn set_timeout(&self, timeout: Duration) {
        self.lock().timeout = Some(timeout);
    }

    fn timeout(&self) -> Duration {
        self.lock().timeout.unwrap_or(DEFAULT_TIMEOUT)
    }
}
