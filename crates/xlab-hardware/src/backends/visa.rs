//! VISA backend.
//!
//! Lists `?*INSTR` resources through the default VISA resource manager and
//! opens them as message interfaces. VISA calls block, so every operation
//! runs on the blocking thread pool. Replies are framed by the END
//! indicator.
//!
//! The reply timeout is the session's VISA timeout attribute. The async side
//! waits [`TIMEOUT_MARGIN`] longer so the VISA error is the one reported.
//!
//! Without the `visa` feature the backend lists nothing and refuses to open.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use xlab_core::interface::DEFAULT_TIMEOUT;
use xlab_core::{Interface, Result, XlabError};

use super::Backend;

/// Extra time the async side waits beyond the VISA timeout.
pub const TIMEOUT_MARGIN: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub struct VisaBackend {
    timeout: Duration,
}

impl VisaBackend {
    /// Backend whose sessions open with `timeout` as their VISA timeout.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for VisaBackend {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

/// Value for the VISA timeout attribute, saturating at its maximum.
#[cfg_attr(not(feature = "visa"), allow(dead_code))]
fn visa_timeout_ms(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

/// How long the async side waits for a blocking VISA call.
#[cfg_attr(not(feature = "visa"), allow(dead_code))]
fn call_bound(timeout: Duration) -> Duration {
    timeout.saturating_add(TIMEOUT_MARGIN)
}

#[cfg(not(feature = "visa"))]
#[async_trait]
impl Backend for VisaBackend {
    fn name(&self) -> &'static str {
        "visa"
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn open(&self, resource: &str) -> Result<Arc<dyn Interface>> {
        Err(XlabError::NotAvailable(format!(
            "cannot open visa:{}: VISA support not compiled in",
            resource
        )))
    }
}

#[cfg(feature = "visa")]
#[async_trait]
impl Backend for VisaBackend {
    fn name(&self) -> &'static str {
        "visa"
    }

    async fn list(&self) -> Result<Vec<String>> {
        blocking(session::list_resources).await
    }

    async fn open(&self, resource: &str) -> Result<Arc<dyn Interface>> {
        let name = resource.to_string();
        let timeout_ms = visa_timeout_ms(self.timeout);
        let session = blocking(move || {
            let mut session = session::VisaSession::open(&name)?;
            session.apply_timeout(timeout_ms)?;
            Ok(session)
        })
        .await?;
        Ok(Arc::new(VisaInterface::new(resource, session, self.timeout)))
    }
}

#[cfg(feature = "visa")]
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| XlabError::Io(std::io::Error::other(e)))?
}

#[cfg(feature = "visa")]
mod session {
    use std::ffi::CString;
    use std::io::{Read, Write};

    use visa_rs::attribute::AttrTmoValue;
    use visa_rs::prelude::*;
    use visa_rs::HasAttribute;
    use xlab_core::{Result, XlabError};

    fn visa_error(context: &str, e: impl std::fmt::Display) -> XlabError {
        XlabError::NotAvailable(format!("{}: {}", context, e))
    }

    fn visa_string(s: &str) -> Result<VisaString> {
        CString::new(s)
            .map(VisaString::from)
            .map_err(|_| XlabError::invalid(format!("resource contains NUL: {:?}", s)))
    }

    pub(super) fn list_resources() -> Result<Vec<String>> {
        let rm = DefaultRM::new().map_err(|e| visa_error("VISA runtime not available", e))?;
        let expr = visa_string("?*INSTR")?;
        let mut found = Vec::new();
        // An empty search is reported as an error by VISA
        let mut list = match rm.find_res_list(&expr) {
            Ok(list) => list,
            Err(_) => return Ok(found),
        };
        while let Some(resource) = list
            .find_next()
            .map_err(|e| visa_error("VISA resource search failed", e))?
        {
            found.push(resource.to_string());
        }
        Ok(found)
    }

    /// Open instrument session together with the resource manager that owns
    /// it; closing the manager closes the session.
    pub(super) struct VisaSession {
        instrument: Instrument,
        _rm: DefaultRM,
        timeout_ms: Option<u32>,
    }

    impl VisaSession {
        pub(super) fn open(resource: &str) -> Result<Self> {
            let rm = DefaultRM::new().map_err(|e| visa_error("VISA runtime not available", e))?;
            let name = visa_string(resource)?;
            let instrument = rm
                .open(&name, AccessMode::NO_LOCK, TIMEOUT_IMMEDIATE)
                .map_err(|e| visa_error(&format!("cannot open {}", resource), e))?;
            Ok(Self {
                instrument,
                _rm: rm,
                timeout_ms: None,
            })
        }

        /// Set the VISA timeout attribute unless it already has this value.
        pub(super) fn apply_timeout(&mut self, timeout_ms: u32) -> Result<()> {
            if self.timeout_ms == Some(timeout_ms) {
                return Ok(());
            }
            let attr = AttrTmoValue::new_checked(timeout_ms).ok_or_else(|| {
                XlabError::invalid(format!("VISA timeout out of range: {} ms", timeout_ms))
            })?;
            self.instrument
                .set_attr(attr)
                .map_err(|e| visa_error("cannot set VISA timeout", e))?;
            self.timeout_ms = Some(timeout_ms);
            Ok(())
        }

        pub(super) fn write(&self, data: &str) -> Result<()> {
            let mut message = data.as_bytes().to_vec();
            message.push(b'\n');
            (&self.instrument).write_all(&message)?;
            Ok(())
        }

        /// Read one message, up to the END indicator.
        ///
        /// A read that fills the whole buffer stopped short of END.
        pub(super) fn read_message(&self) -> Result<Vec<u8>> {
            let mut data = Vec::new();
            let mut chunk = vec![0u8; 64 * 1024];
            loop {
                let n = (&self.instrument).read(&mut chunk)?;
                data.extend_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    return Ok(data);
                }
            }
        }

        /// Read a definite length block, which may take several reads.
        pub(super) fn read_block(&self) -> Result<Vec<u8>> {
            let mut data = Vec::new();
            let mut chunk = vec![0u8; 64 * 1024];
            loop {
                let n = (&self.instrument).read(&mut chunk)?;
                if n == 0 {
                    return Err(XlabError::protocol("VISA read returned no data"));
                }
                data.extend_from_slice(&chunk[..n]);
                if let Some(total) = block_length(&data) {
                    if data.len() >= total {
                        data.truncate(total);
                        return Ok(data);
                    }
                }
            }
        }
    }

    /// Total reply length once the block header is complete.
    fn block_length(data: &[u8]) -> Option<usize> {
        let hash = data.iter().position(|&b| b == b'#')?;
        let ndigits = (*data.get(hash + 1)? as char).to_digit(10)? as usize;
        let digits = data.get(hash + 2..hash + 2 + ndigits)?;
        let nbytes: usize = std::str::from_utf8(digits).ok()?.parse().ok()?;
        Some(hash + 2 + ndigits + nbytes + 1)
    }
}

#[cfg(feature = "visa")]
struct VisaInterface {
    resource: String,
    session: Arc<std::sync::Mutex<session::VisaSession>>,
    timeout_ms: std::sync::atomic::AtomicU64,
}

#[cfg(feature = "visa")]
impl VisaInterface {
    fn new(resource: &str, session: session::VisaSession, timeout: Duration) -> Self {
        Self {
            resource: resource.to_string(),
            session: Arc::new(std::sync::Mutex::new(session)),
            timeout_ms: std::sync::atomic::AtomicU64::new(timeout.as_millis() as u64),
        }
    }

    /// Run `f` on the session in the blocking pool.
    ///
    /// A changed timeout is written to the session first. The wait is bounded
    /// by the timeout plus [`TIMEOUT_MARGIN`].
    async fn with_session<T, F>(&self, what: &str, f: F) -> Result<T>
    where
        F: FnOnce(&session::VisaSession) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let session = Arc::clone(&self.session);
        let timeout = self.timeout();
        let timeout_ms = visa_timeout_ms(timeout);
        let task = blocking(move || {
            let mut guard = session.lock().unwrap_or_else(|e| e.into_inner());
            guard.apply_timeout(timeout_ms)?;
            f(&guard)
        });
        tokio::time::timeout(call_bound(timeout), task).await.map_err(|_| {
            XlabError::Timeout(format!(
                "no reply to '{}' from {} within {} ms",
                what,
                self.resource,
                timeout.as_millis()
            ))
        })?
    }
}

#[cfg(feature = "visa")]
impl std::fmt::Debug for VisaInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisaInterface")
            .field("resource", &self.resource)
            .field("timeout", &self.timeout())
            .finish()
    }
}

#[cfg(feature = "visa")]
#[async_trait]
impl Interface for VisaInterface {
    fn backend(&self) -> &str {
        "visa"
    }

    fn resource(&self) -> &str {
        &self.resource
    }

    async fn identify(&self) -> Result<String> {
        Ok(self.query("*IDN?").await?.trim().to_string())
    }

    #[tracing::instrument(skip(self), fields(resource = %self.resource), err)]
    async fn command(&self, data: &str) -> Result<()> {
        let message = data.to_string();
        self.with_session(data, move |s| s.write(&message)).await
    }

    #[tracing::instrument(skip(self), fields(resource = %self.resource), err)]
    async fn query(&self, query: &str) -> Result<String> {
        let message = query.to_string();
        let reply = self
            .with_session(query, move |s| {
                s.write(&message)?;
                s.read_message()
            })
            .await?;
        let reply = String::from_utf8_lossy(&reply)
            .trim_end_matches(&['\r', '\n'][..])
            .to_string();
        tracing::debug!(reply = %reply, "query reply");
        Ok(reply)
    }

    async fn query_raw(&self, query: &str) -> Result<Vec<u8>> {
        let message = query.to_string();
        self.with_session(query, move |s| {
            s.write(&message)?;
            s.read_block()
        })
        .await
    }

    fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms.store(
            timeout.as_millis() as u64,
            std::sync::atomic::Ordering::Relaxed,
        );
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(std::sync::atomic::Ordering::Relaxed))
    }
}
