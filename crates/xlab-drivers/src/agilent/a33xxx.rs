//! Agilent 33xxx function / arbitrary waveform generators.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, instrument};
use xlab_core::capabilities::{DeviceCategory, FunctionGenerator, WaveShape};
use xlab_core::driver::{Capability, DeviceComponents, DriverFactory, Manufacturer};
use xlab_core::scpi::Param;
use xlab_core::{Interface, Result, XlabError};

/// Full scale of the 14-bit DAC.
const DAC_FULL_SCALE: f64 = 8191.0;

/// Factory for the 33xxx series.
pub struct A33xxxFactory;

impl DriverFactory for A33xxxFactory {
    fn driver_type(&self) -> &'static str {
        "a33xxx"
    }

    fn name(&self) -> &'static str {
        "Agilent 33xxx Function Generator"
    }

    fn manufacturer(&self) -> Manufacturer {
        Manufacturer::Agilent
    }

    fn id_pattern(&self) -> &'static str {
        r"Agilent Technologies,33[0-9]{3}A?,"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::FunctionGenerator]
    }

    fn build(&self, interface: Arc<dyn Interface>) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            Ok(DeviceComponents::new()
                .with_category(DeviceCategory::FunctionGenerator)
                .with_function_generator(Arc::new(A33xxx::new(interface))))
        })
    }
}

/// Driver for the 33xxx series.
///
/// Numeric setters take a [`Param`], so `Param::Min` / `Param::Max` (or
/// `-inf` / `+inf`) select the instrument limits.
#[derive(Debug)]
pub struct A33xxx {
    interface: Arc<dyn Interface>,
}

impl A33xxx {
    pub fn new(interface: Arc<dyn Interface>) -> Self {
        Self { interface }
    }

    async fn send(&self, command: String) -> Result<()> {
        self.interface.command(&command).await
    }

    pub async fn set_function(&self, shape: WaveShape) -> Result<()> {
        self.send(format!("FUNCTION {}", shape.scpi())).await
    }

    /// Amplitude in V rms.
    pub async fn set_amplitude_vrms(&self, amplitude: Param) -> Result<()> {
        self.send(format!("VOLTAGE {} Vrms", amplitude.scpi()?)).await
    }

    /// High level voltage.
    pub async fn set_voltage_high(&self, voltage: Param) -> Result<()> {
        self.send(format!("VOLTAGE:HIGH {}", voltage.scpi()?)).await
    }

    /// Low level voltage.
    pub async fn set_voltage_low(&self, voltage: Param) -> Result<()> {
        self.send(format!("VOLTAGE:LOW {}", voltage.scpi()?)).await
    }

    pub async fn set_inverted(&self, inverted: bool) -> Result<()> {
        let polarity = if inverted { "INVERTED" } else { "NORMAL" };
        self.send(format!("OUTPUT:POLARITY {}", polarity)).await
    }

    pub async fn enable_sync(&self, enabled: bool) -> Result<()> {
        self.send(format!("OUTPUT:SYNC {}", on_off(enabled))).await
    }

    /// Output load in ohm, or `MIN`/`MAX`/`INF`. A float `+inf` is `MAX`,
    /// not `INF`.
    pub async fn set_load(&self, load: Param) -> Result<()> {
        self.send(format!("OUTPUT:LOAD {}", load.to_scpi(1.0, Param::LOAD)?))
            .await
    }

    /// Square wave duty cycle, 0..1.
    pub async fn set_square_dutycycle(&self, dutycycle: Param) -> Result<()> {
        self.send(format!(
            "FUNCTION:SQUARE:DCYCLE {}",
            dutycycle.to_scpi(100.0, Param::MIN_MAX)?
        ))
        .await
    }

    /// Ramp symmetry, 0..1.
    pub async fn set_ramp_symmetry(&self, symmetry: Param) -> Result<()> {
        self.send(format!(
            "FUNCTION:RAMP:SYMMETRY {}",
            symmetry.to_scpi(100.0, Param::MIN_MAX)?
        ))
        .await
    }

    /// Pulse period in seconds.
    pub async fn set_period(&self, period: Param) -> Result<()> {
        self.send(format!("PULSE:PERIOD {}", period.scpi()?)).await
    }

    /// Pulse width in seconds.
    pub async fn set_pulse_width(&self, width: Param) -> Result<()> {
        self.send(format!("FUNCTION:PULSE:WIDTH {}", width.scpi()?))
            .await
    }

    /// Pulse duty cycle, 0..1.
    pub async fn set_pulse_dutycycle(&self, dutycycle: Param) -> Result<()> {
        self.send(format!(
            "FUNCTION:PULSE:DCYCLE {}",
            dutycycle.to_scpi(100.0, Param::MIN_MAX)?
        ))
        .await
    }

    /// Pulse edge transition time in seconds.
    pub async fn set_pulse_transition(&self, transition: Param) -> Result<()> {
        self.send(format!("FUNCTION:PULSE:TRANSITION {}", transition.scpi()?))
            .await
    }

    /// Load an arbitrary waveform into volatile memory.
    ///
    /// Samples must lie in -1..1. With `activate`, the volatile waveform and
    /// the user function are selected afterwards.
    #[instrument(skip(self, samples), fields(len = samples.len()), err)]
    pub async fn load_waveform(&self, samples: &[f64], activate: bool) -> Result<()> {
        if samples.is_empty() {
            return Err(XlabError::invalid("waveform is empty"));
        }
        if let Some(bad) = samples.iter().find(|s| !(-1.0..=1.0).contains(*s)) {
            return Err(XlabError::invalid(format!(
                "waveform sample {} outside -1..1",
                bad
            )));
        }

        let dac = samples
            .iter()
            .map(|s| ((s * DAC_FULL_SCALE) as i32).to_string())
            .collect::<Vec<_>>()
            .join(",");
        debug!(bytes = dac.len(), "uploading waveform");
        self.send(format!("DATA:DAC VOLATILE, {}", dac)).await?;

        if activate {
            self.select_user_waveform("VOLATILE").await?;
            self.set_function(WaveShape::User).await?;
        }
        Ok(())
    }

    /// Select a stored waveform: `EXP_RISE`, `EXP_FALL`, `NEG_RAMP`, `SINC`,
    /// `CARDIAC` or `VOLATILE`.
    pub async fn select_user_waveform(&self, name: &str) -> Result<()> {
        self.send(format!("FUNCTION:USER {}", name)).await
    }

    /// Show text on the display; `None` restores the normal display.
    pub async fn set_text(&self, text: Option<&str>) -> Result<()> {
        match text {
            Some(text) => {
                self.send(format!("DISP:TEXT \"{}\"", text.replace('"', "'")))
                    .await
            }
            None => self.send("DISP:TEXT:CLEAR".to_string()).await,
        }
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "ON"
    } else {
        "OFF"
    }
}

#[async_trait]
impl FunctionGenerator for A33xxx {
    async fn apply(
        &self,
        shape: WaveShape,
        frequency: f64,
        amplitude: f64,
        offset: f64,
    ) -> Result<()> {
        self.send(format!(
            "APPLY:{} {:.6}Hz, {:.6}Vpp, {:.6}",
            shape.scpi(),
            frequency,
            amplitude,
            offset
        ))
        .await
    }

    async fn set_frequency(&self, frequency: Param) -> Result<()> {
        self.send(format!("FREQUENCY {}", frequency.scpi()?)).await
    }

    async fn set_amplitude_vpp(&self, amplitude: Param) -> Result<()> {
        self.send(format!("VOLTAGE {} Vpp", amplitude.scpi()?)).await
    }

    async fn set_offset(&self, offset: Param) -> Result<()> {
        self.send(format!("VOLTAGE:OFFSET {}", offset.scpi()?)).await
    }

    async fn enable_output(&self, enabled: bool) -> Result<()> {
        self.send(format!("OUTPUT {}", on_off(enabled))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xlab_core::mock::MockInterface;

    fn generator() -> (MockInterface, A33xxx) {
        let mock = MockInterface::new("visa", "USB0::33220A::INSTR");
        (mock.clone(), A33xxx::new(Arc::new(mock)))
    }

    #[tokio::test]
    async fn apply_and_basic_settings() {
        let (mock, gen) = generator();
        gen.apply(WaveShape::Sine, 1000.0, 2.0, 0.5).await.unwrap();
        gen.set_amplitude_vpp(Param::Max).await.unwrap();
        gen.set_square_dutycycle(Param::Value(0.25)).await.unwrap();
        gen.set_load(Param::Inf).await.unwrap();
        gen.enable_output(true).await.unwrap();

        assert_eq!(
            mock.written(),
            vec![
                "APPLY:SINUSOID 1000.000000Hz, 2.000000Vpp, 0.500000",
                "VOLTAGE MAX Vpp",
                "FUNCTION:SQUARE:DCYCLE 25",
                "OUTPUT:LOAD INF",
                "OUTPUT ON",
            ]
        );
    }

    #[tokio::test]
    async fn load_waveform_scales_and_activates() {
        let (mock, gen) = generator();
        gen.load_waveform(&[0.0, 1.0, -1.0, 0.5], true).await.unwrap();
        assert_eq!(
            mock.written(),
            vec![
                "DATA:DAC VOLATILE, 0,8191,-8191,4095",
                "FUNCTION:USER VOLATILE",
                "FUNCTION USER",
            ]
        );
    }

    #[tokio::test]
    async fn load_waveform_rejects_out_of_range() {
        let (mock, gen) = generator();
        assert!(gen.load_waveform(&[0.0, 1.5], true).await.is_err());
        assert!(gen.load_waveform(&[], false).await.is_err());
        assert!(mock.written().is_empty());
    }

    #[tokio::test]
    async fn display_text() {
        let (mock, gen) = generator();
        gen.set_text(Some("say \"hi\"")).await.unwrap();
        gen.set_text(None).await.unwrap();
        assert_eq!(mock.written(), vec!["DISP:TEXT \"say 'hi'\"", "DISP:TEXT:CLEAR"]);
    }

    #[test]
    fn pattern_matches_models() {
        assert!(A33xxxFactory.matches("Agilent Technologies,33220A,MY1,2.0").unwrap());
        assert!(A33xxxFactory.matches("Agilent Technologies,33521,MY1,2.0").unwrap());
        assert!(!A33xxxFactory.matches("Agilent Technologies,34405A,MY1,2.0").unwrap());
    }
}
