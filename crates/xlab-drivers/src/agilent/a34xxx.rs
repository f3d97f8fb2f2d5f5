//! Agilent 34405A / 34450A bench multimeters.
//!
//! Measurements use the one-shot `MEASURE:<function>?` query, which
//! configures, triggers and reads in one go:
//!
//! ```text
//! MEASURE:[SECONDARY:]VOLTAGE:DC? AUTO,DEF
//! +1.23450000E+00
//! ```
//!
//! Range accepts a value or `MIN`/`MAX`/`AUTO`/`DEF`; resolution a value or
//! `MIN`/`MAX`/`DEF`. `+inf`/`-inf` map to `MAX`/`MIN`. The 34450A has a
//! secondary display, selected with channel 2.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::instrument;
use xlab_core::capabilities::{DeviceCategory, MeasureFunction, Multimeter, Readable};
use xlab_core::driver::{Capability, DeviceComponents, DriverFactory, Manufacturer};
use xlab_core::scpi::{parse_f64, Param};
use xlab_core::{Interface, Result, XlabError};

use super::measure_arguments;

static MULTIMETER_CAPABILITIES: &[Capability] = &[Capability::Multimeter, Capability::Readable];

// =============================================================================
// Factories
// =============================================================================

/// Factory for the Agilent 34405A.
pub struct A34405Factory;

impl DriverFactory for A34405Factory {
    fn driver_type(&self) -> &'static str {
        "a34405"
    }

    fn name(&self) -> &'static str {
        "Agilent 34405A Multimeter"
    }

    fn manufacturer(&self) -> Manufacturer {
        Manufacturer::Agilent
    }

    fn id_pattern(&self) -> &'static str {
        r"Agilent Technologies,34405.?,"
    }

    fn capabilities(&self) -> &'static [Capability] {
        MULTIMETER_CAPABILITIES
    }

    fn build(&self, interface: Arc<dyn Interface>) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move { Ok(A34xxx::a34405(interface).into_components()) })
    }
}

/// Factory for the Agilent 34450A.
pub struct A34450Factory;

impl DriverFactory for A34450Factory {
    fn driver_type(&self) -> &'static str {
        "a34450"
    }

    fn name(&self) -> &'static str {
        "Agilent 34450A Multimeter"
    }

    fn manufacturer(&self) -> Manufacturer {
        Manufacturer::Agilent
    }

    fn id_pattern(&self) -> &'static str {
        r"Agilent Technologies,34450.?,"
    }

    fn capabilities(&self) -> &'static [Capability] {
        MULTIMETER_CAPABILITIES
    }

    fn build(&self, interface: Arc<dyn Interface>) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move { Ok(A34xxx::a34450(interface).into_components()) })
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Driver for the 34405A / 34450A multimeters.
#[derive(Debug)]
pub struct A34xxx {
    interface: Arc<dyn Interface>,
    channels: u8,
}

impl A34xxx {
    /// Single display 34405A.
    pub fn a34405(interface: Arc<dyn Interface>) -> Self {
        Self {
            interface,
            channels: 1,
        }
    }

    /// Dual display 34450A. Sets a 4 s reply timeout.
    pub fn a34450(interface: Arc<dyn Interface>) -> Self {
        interface.set_timeout(Duration::from_secs(4));
        Self {
            interface,
            channels: 2,
        }
    }

    /// Number of displays (channels).
    pub fn channels(&self) -> u8 {
        self.channels
    }

    fn into_components(self) -> DeviceComponents {
        let dmm = Arc::new(self);
        DeviceComponents::new()
            .with_category(DeviceCategory::Multimeter)
            .with_multimeter(dmm.clone())
            .with_readable(dmm)
    }

    /// Build the `MEASURE` query for a function on a channel.
    pub fn measure_query(
        &self,
        function: &MeasureFunction,
        range: Param,
        resolution: Param,
        channel: u8,
    ) -> Result<String> {
        let channel_prefix = match channel {
            1 => "",
            2 if self.channels == 2 => "SECONDARY:",
            _ => {
                return Err(XlabError::invalid(format!(
                    "Invalid channel number {}",
                    channel
                )))
            }
        };

        Ok(format!(
            "MEASURE:{}{}? {}",
            channel_prefix,
            function.scpi(),
            measure_arguments(function, range, resolution)?
        ))
    }

    pub async fn measure_voltage_dc(&self, range: Param, resolution: Param, channel: u8) -> Result<f64> {
        self.measure(&MeasureFunction::VoltageDc, range, resolution, channel)
            .await
    }

    pub async fn measure_voltage_ac(&self, range: Param, resolution: Param, channel: u8) -> Result<f64> {
        self.measure(&MeasureFunction::VoltageAc, range, resolution, channel)
            .await
    }

    pub async fn measure_current_dc(&self, range: Param, resolution: Param, channel: u8) -> Result<f64> {
        self.measure(&MeasureFunction::CurrentDc, range, resolution, channel)
            .await
    }

    pub async fn measure_current_ac(&self, range: Param, resolution: Param, channel: u8) -> Result<f64> {
        self.measure(&MeasureFunction::CurrentAc, range, resolution, channel)
            .await
    }

    /// 2-wire resistance
    pub async fn measure_resistance(&self, range: Param, resolution: Param, channel: u8) -> Result<f64> {
        self.measure(&MeasureFunction::Resistance, range, resolution, channel)
            .await
    }

    /// 4-wire resistance
    pub async fn measure_resistance_4w(
        &self,
        range: Param,
        resolution: Param,
        channel: u8,
    ) -> Result<f64> {
        self.measure(&MeasureFunction::FourWireResistance, range, resolution, channel)
            .await
    }

    /// Temperature with probe type `TC|RTD|FRTD|THER|DEF` and sensor type
    /// (`B|E|J|K|N|R|S|T` for thermocouples, `85|91` for RTDs,
    /// `2252|5000|10000` for thermistors).
    pub async fn measure_temperature(
        &self,
        probe: &str,
        sensor: &str,
        resolution: Param,
        channel: u8,
    ) -> Result<f64> {
        let function = MeasureFunction::Temperature {
            probe: probe.to_string(),
            sensor: sensor.to_string(),
        };
        self.measure(&function, Param::Auto, resolution, channel)
            .await
    }
}

#[async_trait]
impl Multimeter for A34xxx {
    #[instrument(skip(self), fields(interface = %self.interface.interface_id()), err)]
    async fn measure(
        &self,
        function: &MeasureFunction,
        range: Param,
        resolution: Param,
        channel: u8,
    ) -> Result<f64> {
        let query = self.measure_query(function, range, resolution, channel)?;
        parse_f64(&self.interface.query(&query).await?)
    }

    async fn measure_continuity(&self) -> Result<f64> {
        parse_f64(&self.interface.query("MEASURE:CONTINUITY?").await?)
    }
}

#[async_trait]
impl Readable for A34xxx {
    async fn read(&self) -> Result<f64> {
        self.measure_voltage_dc(Param::Auto, Param::Def, 1).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xlab_core::mock::MockInterface;

    #[tokio::test]
    async fn measures_dc_voltage() {
        let mock = MockInterface::new("visa", "USB0::INSTR")
            .with_reply("MEASURE:VOLTAGE:DC? AUTO,DEF", "+1.23450000E+00");
        let dmm = A34xxx::a34405(Arc::new(mock.clone()));

        let v = dmm.measure_voltage_dc(Param::Auto, Param::Def, 1).await.unwrap();
        assert_eq!(v, 1.2345);
        assert_eq!(mock.written(), vec!["MEASURE:VOLTAGE:DC? AUTO,DEF"]);
    }

    #[tokio::test]
    async fn secondary_channel_only_on_dual_display() {
        let mock = MockInterface::new("visa", "x")
            .with_reply("MEASURE:SECONDARY:CURRENT:AC? MAX,MIN", "0.5");

        let single = A34xxx::a34405(Arc::new(mock.clone()));
        let err = single
            .measure_current_ac(Param::Max, Param::Min, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, XlabError::InvalidParameter(_)));

        let dual = A34xxx::a34450(Arc::new(mock.clone()));
        let i = dual
            .measure_current_ac(Param::Value(f64::INFINITY), Param::Value(f64::NEG_INFINITY), 2)
            .await
            .unwrap();
        assert_eq!(i, 0.5);
        assert_eq!(mock.timeout(), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn temperature_query() {
        let mock = MockInterface::new("visa", "x")
            .with_reply("MEASURE:TEMPERATURE? TC,K,1,DEF", "21.5");
        let dmm = A34xxx::a34405(Arc::new(mock));
        let t = dmm
            .measure_temperature("TC", "K", Param::Def, 1)
            .await
            .unwrap();
        assert_eq!(t, 21.5);
    }

    #[tokio::test]
    async fn factory_builds_multimeter() {
        let mock = MockInterface::new("visa", "x")
            .with_reply("MEASURE:CONTINUITY?", "+9.90000000E+37");
        let components = A34405Factory.build(Arc::new(mock)).await.unwrap();

        assert_eq!(components.category, Some(DeviceCategory::Multimeter));
        let dmm = components.multimeter.unwrap();
        assert_eq!(dmm.measure_continuity().await.unwrap(), 9.9e37);
        assert!(A34405Factory.matches("Agilent Technologies,34405A,MY53,1.0").unwrap());
        assert!(!A34405Factory.matches("Agilent Technologies,34450A,MY53,1.0").unwrap());
    }
}
