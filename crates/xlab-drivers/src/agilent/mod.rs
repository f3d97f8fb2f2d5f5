//! Agilent / Keysight instruments.
//!
//! | driver | instruments | identity pattern |
//! |--------|-------------|------------------|
//! | [`A34xxx`] | 34405A, 34450A bench multimeters | `Agilent Technologies,34405.?,` / `34450.?,` |
//! | [`A34972`] | 34972A LXI data acquisition / switch unit | `Agilent Technologies,34972.?,` |
//! | [`A33xxx`] | 33xxx function / arbitrary waveform generators | `Agilent Technologies,33[0-9]{3}A?,` |
//!
//! All of them speak SCPI over a message based interface (VISA or a raw
//! socket).

pub mod a33xxx;
pub mod a34972;
pub mod a34xxx;

pub use a33xxx::{A33xxx, A33xxxFactory};
pub use a34972::{A34972Factory, A34972};
pub use a34xxx::{A34405Factory, A34450Factory, A34xxx};

use xlab_core::capabilities::MeasureFunction;
use xlab_core::scpi::Param;
use xlab_core::Result;

/// Arguments of a `MEASURE:<function>?` query: `<options><range>,<resolution>`.
///
/// Temperature measurements carry `<probe>,<sensor>,` options and a fixed
/// range of 1.
pub(crate) fn measure_arguments(
    function: &MeasureFunction,
    range: Param,
    resolution: Param,
) -> Result<String> {
    let (options, range) = match function {
        MeasureFunction::Temperature { probe, sensor } => {
            (format!("{},{},", probe, sensor), Param::Value(1.0))
        }
        _ => (String::new(), range),
    };

    Ok(format!(
        "{}{},{}",
        options,
        range.to_scpi(1.0, Param::RANGE)?,
        resolution.to_scpi(1.0, Param::RESOLUTION)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_for_plain_functions() {
        let args = measure_arguments(&MeasureFunction::VoltageDc, Param::Auto, Param::Def).unwrap();
        assert_eq!(args, "AUTO,DEF");

        let args =
            measure_arguments(&MeasureFunction::Resistance, Param::Value(1e3), Param::Max).unwrap();
        assert_eq!(args, "1000,MAX");
    }

    #[test]
    fn temperature_has_options_and_fixed_range() {
        let function = MeasureFunction::Temperature {
            probe: "TC".into(),
            sensor: "K".into(),
        };
        let args = measure_arguments(&function, Param::Auto, Param::Def).unwrap();
        assert_eq!(args, "TC,K,1,DEF");
    }

    #[test]
    fn resolution_rejects_auto() {
        assert!(measure_arguments(&MeasureFunction::VoltageAc, Param::Auto, Param::Auto).is_err());
    }
}
