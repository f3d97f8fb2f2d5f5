//! LeCroy X-Stream oscilloscopes (HDO6000 series, WaveSurfer 104).
//!
//! The scopes answer with a command header (`TDIV 1.00E-3 S`,
//! `C1:VDIV 50.0E-3 V`), so replies are matched against the expected header
//! before the value is parsed.
//!
//! Waveforms are transferred as 16-bit binary blocks and decoded with the
//! scope's own `TEMPLATE?` description, fetched on first use and cached.

use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use regex::Regex;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};
use xlab_core::capabilities::{DeviceCategory, Oscilloscope, Trace};
use xlab_core::driver::{Capability, DeviceComponents, DriverFactory, Manufacturer};
use xlab_core::scpi::{parse_definite_length_block, parse_f64, parse_quoted_response};
use xlab_core::{Interface, Result, XlabError};

use super::wavetemplate::{Wave, WaveTemplate};

/// Input channels of the supported models.
pub const CHANNELS: &[&str] = &["C1", "C2", "C3", "C4"];

/// Probe attenuation factors accepted by `set_attenuation`.
pub const ATTENUATION_VALUES: &[u32] = &[1, 2, 5, 10, 20, 25, 50, 100, 200, 500, 1000, 10000];

static TRACE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:F[1-8]|T[A-D]|[MC][1-4])$").expect("Invalid trace regex")
});

static CUSTOM_PARAMETER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^CUST\d$").expect("Invalid custom parameter regex"));

// =============================================================================
// Trigger settings
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerMode {
    #[default]
    Auto,
    Normal,
    Single,
    Stop,
}

impl TriggerMode {
    fn scpi(&self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Normal => "NORM",
            Self::Single => "SINGLE",
            Self::Stop => "STOP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerCoupling {
    Dc,
    #[default]
    Ac,
    /// High frequency reject
    HfReject,
    /// Low frequency reject
    LfReject,
}

impl TriggerCoupling {
    fn scpi(&self) -> &'static str {
        match self {
            Self::Dc => "DC",
            Self::Ac => "AC",
            Self::HfReject => "HFREJ",
            Self::LfReject => "LFREJ",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerSlope {
    #[default]
    Positive,
    Negative,
}

impl TriggerSlope {
    fn scpi(&self) -> &'static str {
        match self {
            Self::Positive => "POS",
            Self::Negative => "NEG",
        }
    }
}

/// Edge trigger configuration.
///
/// `source` is a channel (`C1`..`C4`), `EX` or `LINE`. Coupling and level
/// are not sent for `LINE`. `delay` is in seconds; negative values acquire
/// before the trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerSettings {
    pub mode: TriggerMode,
    pub source: String,
    pub coupling: TriggerCoupling,
    /// Trigger level in volts
    pub level: f64,
    pub slope: TriggerSlope,
    pub delay: f64,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            mode: TriggerMode::Auto,
            source: "C1".to_string(),
            coupling: TriggerCoupling::Ac,
            level: 0.0,
            slope: TriggerSlope::Positive,
            delay: 0.0,
        }
    }
}

// =============================================================================
// Factories
// =============================================================================

/// Supported scope models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeModel {
    Hdo6xxx,
    Ws104,
}

impl ScopeModel {
    fn id_pattern(&self) -> &'static str {
        match self {
            Self::Hdo6xxx => r"\*IDN LECROY,HDO6...",
            Self::Ws104 => r"\*IDN LECROY,WS104",
        }
    }
}

impl fmt::Display for ScopeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hdo6xxx => write!(f, "HDO6xxx"),
            Self::Ws104 => write!(f, "WaveSurfer 104"),
        }
    }
}

static SCOPE_CAPABILITIES: &[Capability] = &[Capability::Oscilloscope];

fn build_scope(
    model: ScopeModel,
    interface: Arc<dyn Interface>,
) -> BoxFuture<'static, Result<DeviceComponents>> {
    Box::pin(async move {
        Ok(DeviceComponents::new()
            .with_category(DeviceCategory::Oscilloscope)
            .with_oscilloscope(Arc::new(LecroyScope::new(model, interface))))
    })
}

/// Factory for the HDO6000 series.
pub struct Hdo6xxxFactory;

impl DriverFactory for Hdo6xxxFactory {
    fn driver_type(&self) -> &'static str {
        "hdo6xxx"
    }

    fn name(&self) -> &'static str {
        "LeCroy HDO6000 Oscilloscope"
    }

    fn manufacturer(&self) -> Manufacturer {
        Manufacturer::LeCroy
    }

    fn id_pattern(&self) -> &'static str {
        ScopeModel::Hdo6xxx.id_pattern()
    }

    fn capabilities(&self) -> &'static [Capability] {
        SCOPE_CAPABILITIES
    }

    fn build(&self, interface: Arc<dyn Interface>) -> BoxFuture<'static, Result<DeviceComponents>> {
        build_scope(ScopeModel::Hdo6xxx, interface)
    }
}

/// Factory for the WaveSurfer 104.
pub struct Ws104Factory;

impl DriverFactory for Ws104Factory {
    fn driver_type(&self) -> &'static str {
        "ws104"
    }

    fn name(&self) -> &'static str {
        "LeCroy WaveSurfer 104 Oscilloscope"
    }

    fn manufacturer(&self) -> Manufacturer {
        Manufacturer::LeCroy
    }

    fn id_pattern(&self) -> &'static str {
        ScopeModel::Ws104.id_pattern()
    }

    fn capabilities(&self) -> &'static [Capability] {
        SCOPE_CAPABILITIES
    }

    fn build(&self, interface: Arc<dyn Interface>) -> BoxFuture<'static, Result<DeviceComponents>> {
        build_scope(ScopeModel::Ws104, interface)
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Driver for LeCroy X-Stream oscilloscopes.
pub struct LecroyScope {
    interface: Arc<dyn Interface>,
    model: ScopeModel,
    template: OnceCell<WaveTemplate>,
}

impl fmt::Debug for LecroyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LecroyScope")
            .field("interface", &self.interface)
            .field("model", &self.model)
            .field("template_cached", &self.template.initialized())
            .finish()
    }
}

fn check_channel(channel: &str) -> Result<()> {
    if CHANNELS.contains(&channel) {
        Ok(())
    } else {
        Err(XlabError::invalid(format!(
            "channel must be any of: {}",
            CHANNELS.join(", ")
        )))
    }
}

/// Parse a header-prefixed reply with one captured float.
fn parse_header_reply(reply: &str, pattern: &str) -> Result<f64> {
    let re = Regex::new(pattern)?;
    let caps = re.captures(reply.trim()).ok_or_else(|| {
        XlabError::protocol(format!(
            "Invalid reply received: {}, expected {}",
            reply, pattern
        ))
    })?;
    parse_f64(&caps[1])
}

/// Value of a `PARAMETER_VALUE?` reply such as `C1:PAVA AMPL,1.234E-1 V,OK`.
fn parse_parameter_reply(reply: &str, require_exact: bool) -> Result<f64> {
    let body = reply.split_once(' ').map_or("", |(_, rest)| rest).trim();
    let mut parts = body.splitn(3, ',');
    let (param, value, status) = match (parts.next(), parts.next(), parts.next()) {
        (Some(p), Some(v), Some(s)) => (p, v, s.trim()),
        _ => {
            return Err(XlabError::protocol(format!(
                "Invalid parameter reply: {}",
                reply
            )))
        }
    };

    let accepted = matches!(status, "OK" | "NP") || (!require_exact && matches!(status, "GT" | "LT"));
    if !accepted {
        return Err(XlabError::protocol(format!(
            "The parameter {} could not be measured. Reply: {}",
            param, body
        )));
    }

    let number = value.split_whitespace().next().unwrap_or_default();
    parse_f64(number)
}

impl LecroyScope {
    /// Wrap an interface. Sets a 10 s reply timeout.
    pub fn new(model: ScopeModel, interface: Arc<dyn Interface>) -> Self {
        interface.set_timeout(Duration::from_secs(10));
        Self {
            interface,
            model,
            template: OnceCell::new(),
        }
    }

    pub fn model(&self) -> ScopeModel {
        self.model
    }

    /// The scope's waveform template, fetched once.
    pub async fn wave_template(&self) -> Result<&WaveTemplate> {
        self.template
            .get_or_try_init(|| async {
                let reply = self.interface.query_quoted("TEMPLATE?").await?;
                let template = WaveTemplate::parse(&parse_quoted_response(&reply)?)?;
                debug!(size = template.descriptor_size(), "wave template loaded");
                Ok::<_, XlabError>(template)
            })
            .await
    }

    /// Probe attenuation of a channel.
    pub async fn set_attenuation(&self, channel: &str, attenuation: u32) -> Result<()> {
        check_channel(channel)?;
        if !ATTENUATION_VALUES.contains(&attenuation) {
            return Err(XlabError::invalid(format!(
                "attenuation must be any of: {:?}",
                ATTENUATION_VALUES
            )));
        }
        self.interface
            .command(&format!("{}:ATTENUATION {}", channel, attenuation))
            .await
    }

    /// Vertical offset in volts, probe attenuation not included.
    pub async fn set_offset(&self, channel: &str, offset: f64) -> Result<()> {
        check_channel(channel)?;
        self.interface
            .command(&format!("{}:OFFSET {:.6e}", channel, offset))
            .await
    }

    pub async fn get_time_div(&self) -> Result<f64> {
        let reply = self.interface.query("TIME_DIV?").await?;
        parse_header_reply(&reply, r"^TDIV (.*?) S")
    }

    pub async fn get_voltage_div(&self, channel: &str) -> Result<f64> {
        check_channel(channel)?;
        let reply = self
            .interface
            .query(&format!("{}:VOLT_DIV?", channel))
            .await?;
        parse_header_reply(&reply, &format!(r"^{}:VDIV (.*?) V", regex::escape(channel)))
    }

    /// Configure an edge trigger.
    #[instrument(skip(self), err)]
    pub async fn set_trigger(&self, settings: &TriggerSettings) -> Result<()> {
        let source = settings.source.to_ascii_uppercase();
        if !(source == "LINE" || source == "EX" || CHANNELS.contains(&source.as_str())) {
            return Err(XlabError::invalid(format!(
                "trigger source must be any of: LINE, EX, {}",
                CHANNELS.join(", ")
            )));
        }

        self.interface
            .command(&format!("TRIG_SELECT EDGE,SR,{}", source))
            .await?;
        if source != "LINE" {
            self.interface
                .command(&format!(
                    "{}:TRIG_COUPLING {}",
                    source,
                    settings.coupling.scpi()
                ))
                .await?;
            self.interface
                .command(&format!("{}:TRIG_LEVEL {:.6}", source, settings.level))
                .await?;
        }
        self.interface
            .command(&format!("TRIG_SLOPE {}", settings.slope.scpi()))
            .await?;
        self.interface
            .command(&format!("TRIG_DELAY {:.6}", settings.delay))
            .await?;
        self.interface
            .command(&format!("TRIG_MODE {}", settings.mode.scpi()))
            .await
    }

    /// Current trigger mode as reported (`AUTO`, `NORM`, ...).
    pub async fn get_trigger_mode(&self) -> Result<String> {
        let reply = self.interface.query("TRIG_MODE?").await?;
        Ok(reply
            .split_once(' ')
            .map_or("", |(_, mode)| mode)
            .trim()
            .to_string())
    }

    /// Read a measurement parameter (`AMPL`, `FREQ`, `PKPK`, `RMS`, ...).
    ///
    /// Custom parameters `CUST1`..`CUST8` take no channel. Replies flagged
    /// greater-than / less-than are accepted unless `require_exact`.
    #[instrument(skip(self), err)]
    pub async fn read_parameter(
        &self,
        channel: Option<&str>,
        parameter: &str,
        require_exact: bool,
    ) -> Result<f64> {
        let prefix = if CUSTOM_PARAMETER_REGEX.is_match(parameter) {
            if channel.is_some() {
                return Err(XlabError::invalid(
                    "channel should be None when reading a CUSTx parameter",
                ));
            }
            String::new()
        } else {
            let channel = channel.ok_or_else(|| XlabError::invalid("a channel is required"))?;
            check_channel(channel)?;
            format!("{}:", channel)
        };

        let reply = self
            .interface
            .query(&format!("{}PARAMETER_VALUE? {}", prefix, parameter))
            .await?;
        parse_parameter_reply(&reply, require_exact)
    }

    /// Define custom parameter `number` (1..8).
    pub async fn set_custom_parameter(&self, number: u8, setting: &str) -> Result<()> {
        self.interface
            .command(&format!("PARAMETER_CUSTOM {},{}", number, setting))
            .await
    }

    /// Definition of custom parameter `number`.
    pub async fn get_custom_parameter(&self, number: u8) -> Result<String> {
        let reply = self
            .interface
            .query(&format!("PARAMETER_CUSTOM? {}", number))
            .await?;
        Ok(reply
            .split_once(',')
            .map_or("", |(_, setting)| setting)
            .trim()
            .to_string())
    }

    /// Transfer and decode a trace (`C1`-`C4`, `F1`-`F8`, `TA`-`TD`, `M1`-`M4`).
    #[instrument(skip(self), fields(interface = %self.interface.interface_id()), err)]
    pub async fn read_waveform(&self, trace: &str) -> Result<Wave> {
        if !TRACE_REGEX.is_match(trace) {
            return Err(XlabError::invalid(format!(
                "Invalid parameter value received for trace ({})",
                trace
            )));
        }

        self.interface.command("COMM_FORMAT DEF9,WORD,BIN").await?;
        let raw = self
            .interface
            .query_raw(&format!("{}:WAVEFORM? ALL", trace))
            .await?;
        let payload = parse_definite_length_block(&raw)?;
        let wave = self.wave_template().await?.decode(payload)?;
        debug!(samples = wave.wave_array_1.len(), "waveform decoded");
        Ok(wave)
    }
}

#[async_trait]
impl Oscilloscope for LecroyScope {
    async fn auto_setup(&self, channel: Option<&str>) -> Result<()> {
        match channel {
            None => self.interface.command("AUTO_SETUP").await,
            Some(channel) => {
                check_channel(channel)?;
                self.interface
                    .command(&format!("{}:AUTO_SETUP FIND", channel))
                    .await
            }
        }
    }

    async fn force_trigger(&self) -> Result<()> {
        self.interface.command("FORCE_TRIGGER").await
    }

    async fn set_time_div(&self, seconds: f64) -> Result<()> {
        self.interface
            .command(&format!("TIME_DIV {:.6e}", seconds))
            .await
    }

    async fn set_voltage_div(&self, channel: &str, volts: f64) -> Result<()> {
        check_channel(channel)?;
        self.interface
            .command(&format!("{}:VDIV {:.6e}", channel, volts))
            .await
    }

    async fn read_trace(&self, trace: &str) -> Result<Trace> {
        let wave = self.read_waveform(trace).await?;
        Ok(Trace {
            time: wave.time,
            values: wave.wave_array_1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lecroy::wavetemplate::tests::{wave_payload, TEMPLATE};
    use xlab_core::mock::MockInterface;

    fn scope(mock: &MockInterface) -> LecroyScope {
        LecroyScope::new(ScopeModel::Hdo6xxx, Arc::new(mock.clone()))
    }

    #[tokio::test]
    async fn header_replies() {
        let mock = MockInterface::new("visa", "TCPIP0::scope::INSTR")
            .with_reply("TIME_DIV?", "TDIV 1.00E-3 S")
            .with_reply("C2:VOLT_DIV?", "C2:VDIV 50.0E-3 V")
            .with_reply("TRIG_MODE?", "TRMD NORM");
        let scope = scope(&mock);

        assert_eq!(scope.get_time_div().await.unwrap(), 1e-3);
        assert_eq!(scope.get_voltage_div("C2").await.unwrap(), 0.05);
        assert_eq!(scope.get_trigger_mode().await.unwrap(), "NORM");
        assert!(scope.get_voltage_div("C5").await.is_err());
    }

    #[tokio::test]
    async fn trigger_on_line_skips_coupling_and_level() {
        let mock = MockInterface::new("visa", "x");
        let scope = scope(&mock);
        let settings = TriggerSettings {
            mode: TriggerMode::Single,
            source: "LINE".into(),
            slope: TriggerSlope::Negative,
            ..TriggerSettings::default()
        };
        scope.set_trigger(&settings).await.unwrap();
        assert_eq!(
            mock.written(),
            vec![
                "TRIG_SELECT EDGE,SR,LINE",
                "TRIG_SLOPE NEG",
                "TRIG_DELAY 0.000000",
                "TRIG_MODE SINGLE",
            ]
        );

        mock.clear_written();
        scope.set_trigger(&TriggerSettings::default()).await.unwrap();
        assert_eq!(mock.written()[1], "C1:TRIG_COUPLING AC");
        assert_eq!(mock.written()[2], "C1:TRIG_LEVEL 0.000000");
    }

    #[tokio::test]
    async fn parameter_status_handling() {
        let mock = MockInterface::new("visa", "x")
            .with_reply("C1:PARAMETER_VALUE? AMPL", "C1:PAVA AMPL,1.234E-1 V,OK")
            .with_reply("C1:PARAMETER_VALUE? FREQ", "C1:PAVA FREQ,1.0E+3 Hz,GT")
            .with_reply("PARAMETER_VALUE? CUST1", "PAVA CUST1,5.0E-1 V,IV");
        let scope = scope(&mock);

        assert_eq!(scope.read_parameter(Some("C1"), "AMPL", true).await.unwrap(), 0.1234);
        assert_eq!(scope.read_parameter(Some("C1"), "FREQ", false).await.unwrap(), 1000.0);
        assert!(scope.read_parameter(Some("C1"), "FREQ", true).await.is_err());
        assert!(scope.read_parameter(None, "CUST1", false).await.is_err());
        assert!(scope.read_parameter(Some("C1"), "CUST1", false).await.is_err());
    }

    #[tokio::test]
    async fn attenuation_is_validated() {
        let mock = MockInterface::new("visa", "x");
        let scope = scope(&mock);
        scope.set_attenuation("C3", 10).await.unwrap();
        assert!(scope.set_attenuation("C3", 3).await.is_err());
        assert_eq!(mock.written(), vec!["C3:ATTENUATION 10"]);
    }

    #[tokio::test]
    async fn reads_and_decodes_waveform() {
        let mut block = b"C1:WF ALL,#3".to_vec();
        let payload = wave_payload();
        block.extend_from_slice(format!("{:03}", payload.len()).as_bytes());
        block.extend_from_slice(&payload);
        block.push(b'\n');

        let quoted = format!("TMPL \"\n{}\"\n", TEMPLATE);
        let mock = MockInterface::new("visa", "x")
            .with_reply("TEMPLATE?", quoted)
            .with_raw_reply("C1:WAVEFORM? ALL", block);
        let scope = scope(&mock);

        let trace = scope.read_trace("C1").await.unwrap();
        assert_eq!(trace.values, vec![-1.0, 1.0, -2.0]);
        assert_eq!(trace.time, vec![-1.0, -0.75, -0.5]);

        // Template is fetched once
        scope.read_waveform("C1").await.unwrap();
        let templates = mock.written().iter().filter(|m| *m == "TEMPLATE?").count();
        assert_eq!(templates, 1);
        assert_eq!(mock.written()[0], "COMM_FORMAT DEF9,WORD,BIN");

        assert!(scope.read_waveform("X9").await.is_err());
    }

    #[test]
    fn identity_patterns() {
        assert!(Hdo6xxxFactory.matches("*IDN LECROY,HDO6104,LCRY123,7.0").unwrap());
        assert!(Ws104Factory.matches("*IDN LECROY,WS104,LCRY1,5.0").unwrap());
        assert!(!Ws104Factory.matches("*IDN LECROY,HDO6104,LCRY123,7.0").unwrap());
    }
}
