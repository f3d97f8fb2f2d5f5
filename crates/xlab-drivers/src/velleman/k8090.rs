//! Velleman K8090 8-channel USB relay card.
//!
//! The card speaks 7-byte binary frames at 19200 baud:
//!
//! ```text
//! STX(0x04) CMD MASK P1 P2 CHK ETX(0x0F)
//! ```
//!
//! with `CHK = -(STX + CMD + MASK + P1 + P2) & 0xFF`, so the first six bytes of
//! a valid frame sum to zero modulo 256. The card reports relay changes with
//! a status frame (CMD 0x51, P1 = current relay state) which is used to keep
//! a cached copy of the relay state.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use futures::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use xlab_core::capabilities::{DeviceCategory, RelayCard};
use xlab_core::driver::{Capability, DeviceComponents, DriverFactory, Manufacturer};
use xlab_core::serial::{open_shared, port_from_resource, SharedPort};
use xlab_core::{Interface, Result, XlabError};

const BAUD_RATE: u32 = 19_200;

const STX: u8 = 0x04;
const ETX: u8 = 0x0F;
const FRAME_LEN: usize = 7;

const CMD_SWITCH_ON: u8 = 0x11;
const CMD_SWITCH_OFF: u8 = 0x12;
const CMD_TOGGLE: u8 = 0x14;
const CMD_QUERY_STATUS: u8 = 0x18;
const CMD_BUTTON_MODE: u8 = 0x21;
const EVT_STATUS: u8 = 0x51;

/// Quiet period that ends a poll of the input.
const POLL_IDLE: Duration = Duration::from_millis(10);
const STATUS_TIMEOUT: Duration = Duration::from_secs(1);

// =============================================================================
// Relay mask
// =============================================================================

/// Set of relays, bit `n-1` for relay `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayMask(pub u8);

impl RelayMask {
    /// Mask from relay numbers 1..8.
    pub fn from_channels(channels: &[u8]) -> Result<Self> {
        channels.iter().try_fold(RelayMask(0), |mask, &channel| {
            if (1..=8).contains(&channel) {
                Ok(RelayMask(mask.0 | 1 << (channel - 1)))
            } else {
                Err(XlabError::invalid(format!(
                    "relay numbers should be 1..8, got {}",
                    channel
                )))
            }
        })
    }

    /// Relay numbers set in this mask.
    pub fn channels(&self) -> Vec<u8> {
        (1..=8).filter(|n| self.0 & (1 << (n - 1)) != 0).collect()
    }
}

impl From<u8> for RelayMask {
    fn from(bits: u8) -> Self {
        RelayMask(bits)
    }
}

// =============================================================================
// Frames
// =============================================================================

/// One K8090 frame without STX, checksum and ETX.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub cmd: u8,
    pub mask: u8,
    pub param1: u8,
    pub param2: u8,
}

impl Frame {
    pub fn new(cmd: u8, mask: u8, param1: u8, param2: u8) -> Self {
        Self {
            cmd,
            mask,
            param1,
            param2,
        }
    }

    fn checksum(&self) -> u8 {
        STX.wrapping_add(self.cmd)
            .wrapping_add(self.mask)
            .wrapping_add(self.param1)
            .wrapping_add(self.param2)
            .wrapping_neg()
    }

    /// Wire encoding.
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut buf = BytesMut::with_capacity(FRAME_LEN);
        buf.put_u8(STX);
        buf.put_u8(self.cmd);
        buf.put_u8(self.mask);
        buf.put_u8(self.param1);
        buf.put_u8(self.param2);
        buf.put_u8(self.checksum());
        buf.put_u8(ETX);

        let mut out = [0u8; FRAME_LEN];
        out.copy_from_slice(&buf);
        out
    }
}

/// Receive queue that splits the incoming byte stream into frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    queue: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.queue.extend_from_slice(data);
    }

    /// Next complete frame, or `None` until more data arrives.
    ///
    /// Bytes before STX are discarded. A candidate with a bad checksum or
    /// missing ETX loses its STX and decoding resumes at the next STX.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match self.queue.iter().position(|&b| b == STX) {
                Some(start) => self.queue.advance(start),
                None => {
                    self.queue.clear();
                    return None;
                }
            }

            if self.queue.len() < FRAME_LEN {
                return None;
            }

            let sum = self.queue[..6].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
            if sum == 0 && self.queue[6] == ETX {
                let mut raw = self.queue.split_to(FRAME_LEN);
                raw.advance(1);
                let frame = Frame::new(raw.get_u8(), raw.get_u8(), raw.get_u8(), raw.get_u8());
                return Some(frame);
            }

            self.queue.advance(1);
            warn!("Received invalid packet from K8090, trying to resync");
        }
    }

    /// Bytes waiting for a complete frame.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

// =============================================================================
// Factory
// =============================================================================

pub struct K8090Factory;

impl DriverFactory for K8090Factory {
    fn driver_type(&self) -> &'static str {
        "k8090"
    }

    fn name(&self) -> &'static str {
        "Velleman K8090 Relay Card"
    }

    fn manufacturer(&self) -> Manufacturer {
        Manufacturer::Velleman
    }

    fn id_pattern(&self) -> &'static str {
        r"K8090 8-Channel Relay Card$"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::RelayCard]
    }

    fn build(&self, interface: Arc<dyn Interface>) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let card = K8090::open(port_from_resource(interface.resource())).await?;
            Ok(DeviceComponents::new()
                .with_category(DeviceCategory::Relay)
                .with_relay_card(Arc::new(card)))
        })
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Driver for the K8090.
pub struct K8090 {
    port: SharedPort,
    decoder: Mutex<FrameDecoder>,
    state: AtomicU8,
}

impl fmt::Debug for K8090 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("K8090")
            .field("relays", &format_args!("{:08b}", self.state.load(Ordering::Relaxed)))
            .finish_non_exhaustive()
    }
}

impl K8090 {
    /// Open the card on a serial port.
    pub async fn open(port_path: &str) -> Result<Self> {
        Ok(Self::with_port(
            open_shared(port_path, BAUD_RATE, "K8090").await?,
        ))
    }

    /// Use an already opened port.
    pub fn with_port(port: SharedPort) -> Self {
        Self {
            port,
            decoder: Mutex::new(FrameDecoder::new()),
            state: AtomicU8::new(0),
        }
    }

    /// Relay state as last reported by the card.
    pub fn cached_state(&self) -> RelayMask {
        RelayMask(self.state.load(Ordering::Relaxed))
    }

    #[instrument(skip(self), err)]
    async fn send(&self, frame: Frame) -> Result<()> {
        {
            let mut port = self.port.lock().await;
            port.get_mut().write_all(&frame.encode()).await?;
            port.get_mut().flush().await?;
        }
        self.poll().await.map(|_| ())
    }

    /// Read whatever input is available and handle complete frames.
    ///
    /// Returns the frames received.
    pub async fn poll(&self) -> Result<Vec<Frame>> {
        let mut port = self.port.lock().await;
        let mut decoder = self.decoder.lock().await;
        let mut buf = [0u8; 64];

        loop {
            match tokio::time::timeout(POLL_IDLE, port.read(&mut buf)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => decoder.extend(&buf[..n]),
                Ok(Err(e)) => return Err(e.into()),
            }
        }

        let mut frames = Vec::new();
        while let Some(frame) = decoder.next_frame() {
            self.handle(&frame);
            frames.push(frame);
        }
        Ok(frames)
    }

    fn handle(&self, frame: &Frame) {
        if frame.cmd == EVT_STATUS {
            debug!(
                previous = frame.mask,
                current = frame.param1,
                timers = frame.param2,
                "K8090 relay status"
            );
            self.state.store(frame.param1, Ordering::Relaxed);
        }
    }

    pub async fn switch_on_mask(&self, mask: RelayMask) -> Result<()> {
        self.send(Frame::new(CMD_SWITCH_ON, mask.0, 0, 0)).await
    }

    pub async fn switch_off_mask(&self, mask: RelayMask) -> Result<()> {
        self.send(Frame::new(CMD_SWITCH_OFF, mask.0, 0, 0)).await
    }

    pub async fn toggle_mask(&self, mask: RelayMask) -> Result<()> {
        self.send(Frame::new(CMD_TOGGLE, mask.0, 0, 0)).await
    }

    /// Disable the front buttons of the relays in `enabled`'s complement.
    /// `RelayMask(0)` disables every button.
    pub async fn set_buttons_enabled(&self, enabled: RelayMask) -> Result<()> {
        self.send(Frame::new(CMD_BUTTON_MODE, 0, enabled.0, 0)).await
    }

    pub async fn disable_buttons(&self) -> Result<()> {
        self.set_buttons_enabled(RelayMask(0)).await
    }

    /// Ask the card for its relay state and wait for the status frame.
    #[instrument(skip(self), err)]
    pub async fn query_status(&self) -> Result<RelayMask> {
        let request = Frame::new(CMD_QUERY_STATUS, 0, 0, 0);
        {
            let mut port = self.port.lock().await;
            port.get_mut().write_all(&request.encode()).await?;
            port.get_mut().flush().await?;
        }

        let deadline = tokio::time::Instant::now() + STATUS_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            if let Some(status) = self
                .poll()
                .await?
                .into_iter()
                .rev()
                .find(|f| f.cmd == EVT_STATUS)
            {
                return Ok(RelayMask(status.param1));
            }
        }
        Err(XlabError::Timeout(
            "K8090 did not report its relay status".into(),
        ))
    }
}

#[async_trait]
impl RelayCard for K8090 {
    async fn switch_on(&self, relays: &[u8]) -> Result<()> {
        self.switch_on_mask(RelayMask::from_channels(relays)?).await
    }

    async fn switch_off(&self, relays: &[u8]) -> Result<()> {
        self.switch_off_mask(RelayMask::from_channels(relays)?).await
    }

    async fn toggle(&self, relays: &[u8]) -> Result<()> {
        self.toggle_mask(RelayMask::from_channels(relays)?).await
    }

    async fn relay_status(&self) -> Result<u8> {
        Ok(self.query_status().await?.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xlab_core::serial::wrap_shared;

    #[test]
    fn mask_from_channels() {
        assert_eq!(RelayMask::from_channels(&[1, 4, 6]).unwrap(), RelayMask(0x29));
        assert_eq!(RelayMask::from_channels(&[]).unwrap(), RelayMask(0));
        assert!(RelayMask::from_channels(&[0]).is_err());
        assert!(RelayMask::from_channels(&[9]).is_err());
        assert_eq!(RelayMask(0x29).channels(), vec![1, 4, 6]);
    }

    #[test]
    fn frames_sum_to_zero() {
        for frame in [
            Frame::new(CMD_SWITCH_ON, 0x29, 0, 0),
            Frame::new(CMD_BUTTON_MODE, 0, 0xff, 0),
            Frame::new(EVT_STATUS, 0xff, 0xff, 0xff),
        ] {
            let raw = frame.encode();
            let sum = raw[..6].iter().fold(0u8, |a, b| a.wrapping_add(*b));
            assert_eq!(sum, 0);
            assert_eq!(raw[0], STX);
            assert_eq!(raw[6], ETX);
        }
        assert_eq!(
            Frame::new(CMD_SWITCH_ON, 0x01, 0, 0).encode(),
            [0x04, 0x11, 0x01, 0x00, 0x00, 0xea, 0x0f]
        );
    }

    #[test]
    fn decoder_resyncs_after_garbage() {
        let status = Frame::new(EVT_STATUS, 0x00, 0x05, 0x00);
        let mut decoder = FrameDecoder::new();

        // Noise, a truncated frame with a bad checksum, then a valid frame
        decoder.extend(&[0xaa, 0x55, STX, 0x11, 0x00]);
        decoder.extend(&status.encode());
        assert_eq!(decoder.next_frame(), Some(status));
        assert_eq!(decoder.next_frame(), None);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn decoder_waits_for_complete_frame() {
        let frame = Frame::new(EVT_STATUS, 0, 1, 0).encode();
        let mut decoder = FrameDecoder::new();
        decoder.extend(&frame[..4]);
        assert_eq!(decoder.next_frame(), None);
        decoder.extend(&frame[4..]);
        assert!(decoder.next_frame().is_some());
    }

    #[tokio::test]
    async fn switch_on_writes_frame_and_tracks_status() {
        let (mut host, device) = tokio::io::duplex(64);
        let card = K8090::with_port(wrap_shared(Box::new(device)));

        host.write_all(&Frame::new(EVT_STATUS, 0, 0x03, 0).encode())
            .await
            .unwrap();
        card.switch_on(&[1, 2]).await.unwrap();

        let mut sent = [0u8; FRAME_LEN];
        host.read_exact(&mut sent).await.unwrap();
        assert_eq!(sent, Frame::new(CMD_SWITCH_ON, 0x03, 0, 0).encode());
        assert_eq!(card.cached_state(), RelayMask(0x03));
        assert_eq!(format!("{:?}", card), "K8090 { relays: 00000011, .. }");
    }

    #[tokio::test]
    async fn query_status_waits_for_report() {
        let (mut host, device) = tokio::io::duplex(64);
        let card = K8090::with_port(wrap_shared(Box::new(device)));

        let responder = tokio::spawn(async move {
            let mut request = [0u8; FRAME_LEN];
            host.read_exact(&mut request).await.unwrap();
            assert_eq!(request[1], CMD_QUERY_STATUS);
            host.write_all(&Frame::new(EVT_STATUS, 0, 0x81, 0).encode())
                .await
                .unwrap();
            host
        });

        assert_eq!(card.relay_status().await.unwrap(), 0x81);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn rejects_invalid_relay_numbers() {
        let (_host, device) = tokio::io::duplex(64);
        let card = K8090::with_port(wrap_shared(Box::new(device)));
        assert!(matches!(
            card.toggle(&[9]).await,
            Err(XlabError::InvalidParameter(_))
        ));
    }
}
