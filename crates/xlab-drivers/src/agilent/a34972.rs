//! Agilent 34972A LXI data acquisition / switch unit.
//!
//! Every measurement scans an explicit channel list:
//!
//! ```text
//! MEASURE:VOLTAGE:DC? AUTO,DEF,(@101,102)
//! +1.0E+00,+2.0E+00
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::instrument;
use xlab_core::capabilities::{DataAcquisition, DeviceCategory, MeasureFunction};
use xlab_core::driver::{Capability, DeviceComponents, DriverFactory, Manufacturer};
use xlab_core::scpi::{parse_float_list, Param};
use xlab_core::{Interface, Result, XlabError};

use super::measure_arguments;

/// Factory for the Agilent 34972A.
pub struct A34972Factory;

impl DriverFactory for A34972Factory {
    fn driver_type(&self) -> &'static str {
        "a34972"
    }

    fn name(&self) -> &'static str {
        "Agilent 34972A Data Acquisition / Switch Unit"
    }

    fn manufacturer(&self) -> Manufacturer {
        Manufacturer::Agilent
    }

    fn id_pattern(&self) -> &'static str {
        r"Agilent Technologies,34972.?,"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::DataAcquisition]
    }

    fn build(&self, interface: Arc<dyn Interface>) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            Ok(DeviceComponents::new()
                .with_category(DeviceCategory::DataAcquisition)
                .with_data_acquisition(Arc::new(A34972::new(interface))))
        })
    }
}

/// Driver for the 34972A. Sets a 10 s reply timeout, scans take a while.
#[derive(Debug)]
pub struct A34972 {
    interface: Arc<dyn Interface>,
}

impl A34972 {
    pub fn new(interface: Arc<dyn Interface>) -> Self {
        interface.set_timeout(Duration::from_secs(10));
        Self { interface }
    }

    /// Build the `MEASURE` query for a channel list.
    pub fn measure_query(
        function: &MeasureFunction,
        range: Param,
        resolution: Param,
        channels: &[u32],
    ) -> Result<String> {
        if channels.is_empty() {
            return Err(XlabError::invalid("channel list is empty"));
        }
        let scan_list = channels
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(",");

        Ok(format!(
            "MEASURE:{}? {},(@{})",
            function.scpi(),
            measure_arguments(function, range, resolution)?,
            scan_list
        ))
    }

    pub async fn measure_voltage_dc(&self, range: Param, resolution: Param, channels: &[u32]) -> Result<Vec<f64>> {
        self.measure_channels(&MeasureFunction::VoltageDc, range, resolution, channels)
            .await
    }

    pub async fn measure_resistance(&self, range: Param, resolution: Param, channels: &[u32]) -> Result<Vec<f64>> {
        self.measure_channels(&MeasureFunction::Resistance, range, resolution, channels)
            .await
    }

    pub async fn measure_temperature(
        &self,
        probe: &str,
        sensor: &str,
        resolution: Param,
        channels: &[u32],
    ) -> Result<Vec<f64>> {
        let function = MeasureFunction::Temperature {
            probe: probe.to_string(),
            sensor: sensor.to_string(),
        };
        self.measure_channels(&function, Param::Auto, resolution, channels)
            .await
    }
}

#[async_trait]
impl DataAcquisition for A34972 {
    #[instrument(skip(self), err)]
    async fn measure_channels(
        &self,
        function: &MeasureFunction,
        range: Param,
        resolution: Param,
        channels: &[u32],
    ) -> Result<Vec<f64>> {
        let query = Self::measure_query(function, range, resolution, channels)?;
        let values = parse_float_list(&self.interface.query(&query).await?)?;
        if values.len() != channels.len() {
            return Err(XlabError::protocol(format!(
                "expected {} readings, received {}",
                channels.len(),
                values.len()
            )));
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xlab_core::mock::MockInterface;

    #[tokio::test]
    async fn scans_channel_list() {
        let mock = MockInterface::new("visa", "TCPIP0::daq::INSTR")
            .with_reply("MEASURE:VOLTAGE:DC? AUTO,DEF,(@101,102)", "+1.0E+00,+2.5E-01");
        let daq = A34972::new(Arc::new(mock.clone()));

        let values = daq
            .measure_voltage_dc(Param::Auto, Param::Def, &[101, 102])
            .await
            .unwrap();
        assert_eq!(values, vec![1.0, 0.25]);
        assert_eq!(mock.timeout(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn empty_channel_list_is_rejected() {
        let daq = A34972::new(Arc::new(MockInterface::new("visa", "x")));
        let err = daq
            .measure_resistance(Param::Auto, Param::Def, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, XlabError::InvalidParameter(_)));
    }

    #[test]
    fn temperature_scan_query() {
        let function = MeasureFunction::Temperature {
            probe: "TC".into(),
            sensor: "J".into(),
        };
        let q = A34972::measure_query(&function, Param::Auto, Param::Max, &[201]).unwrap();
        assert_eq!(q, "MEASURE:TEMPERATURE? TC,J,1,MAX,(@201)");
    }
}
