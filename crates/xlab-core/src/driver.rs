//! Driver factories and the capability bag they build.
//!
//! Drivers implement [`DriverFactory`] and are registered with the
//! instrument registry at startup. When an instrument is opened the registry
//! reads its identity, picks the single factory whose [`id_pattern`] matches
//! the start of it, and asks that factory to build the driver on the open
//! interface.
//!
//! ```text
//! interface id ──► Backend::open ──► Interface::identify ──► identity
//!                                                               │
//!            DriverFactory::id_pattern (anchored regex) ◄───────┘
//!                          │ exactly one match
//!                          ▼
//!            DriverFactory::build(interface) ──► DeviceComponents
//! ```
//!
//! [`id_pattern`]: DriverFactory::id_pattern
//!
//! # Example: Implementing a Driver Factory
//!
//! ```rust,ignore
//! pub struct A34405Factory;
//!
//! impl DriverFactory for A34405Factory {
//!     fn driver_type(&self) -> &'static str { "a34405" }
//!     fn name(&self) -> &'static str { "Agilent 34405A Multimeter" }
//!     fn manufacturer(&self) -> Manufacturer { Manufacturer::Agilent }
//!     fn id_pattern(&self) -> &'static str { r"Agilent Technologies,34405.?," }
//!
//!     fn build(&self, interface: Arc<dyn Interface>) -> BoxFuture<'static, Result<DeviceComponents>> {
//!         Box::pin(async move {
//!             let dmm = Arc::new(A34xxx::a34405(interface));
//!             Ok(DeviceComponents::new().with_multimeter(dmm.clone()).with_readable(dmm))
//!         })
//!     }
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::capabilities::{
    DataAcquisition, DeviceCategory, ElectronicLoad, FunctionGenerator, Multimeter,
    Oscilloscope, PowerSupply, Readable, RelayCard, SignalGenerator,
};
use crate::error::Result;
use crate::interface::Interface;

// =============================================================================
// Manufacturer
// =============================================================================

/// Instrument manufacturers with built-in drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Manufacturer {
    /// Agilent / Keysight
    Agilent,
    LeCroy,
    Mitutoyo,
    RohdeSchwarz,
    Tti,
    Velleman,
}

impl fmt::Display for Manufacturer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Agilent => "Agilent",
            Self::LeCroy => "LeCroy",
            Self::Mitutoyo => "Mitutoyo",
            Self::RohdeSchwarz => "Rohde & Schwarz",
            Self::Tti => "TTI",
            Self::Velleman => "Velleman",
        };
        f.pad(name)
    }
}

// =============================================================================
// Capability Enum (Runtime Introspection)
// =============================================================================

/// Runtime capability flags, mirroring the capability traits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// [`Readable`]
    Readable,
    /// [`Multimeter`]
    Multimeter,
    /// [`DataAcquisition`]
    DataAcquisition,
    /// [`FunctionGenerator`]
    FunctionGenerator,
    /// [`SignalGenerator`]
    SignalGenerator,
    /// [`Oscilloscope`]
    Oscilloscope,
    /// [`PowerSupply`]
    PowerSupply,
    /// [`ElectronicLoad`]
    ElectronicLoad,
    /// [`RelayCard`]
    RelayCard,
}

impl Capability {
    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Readable => "Readable",
            Self::Multimeter => "Multimeter",
            Self::DataAcquisition => "Data Acquisition",
            Self::FunctionGenerator => "Function Generator",
            Self::SignalGenerator => "Signal Generator",
            Self::Oscilloscope => "Oscilloscope",
            Self::PowerSupply => "Power Supply",
            Self::ElectronicLoad => "Electronic Load",
            Self::RelayCard => "Relay Card",
        }
    }
}

// =============================================================================
// Device Components (Capability Bag)
// =============================================================================

/// Capability trait objects returned by a driver factory.
///
/// Each capability is stored separately so callers get typed access without
/// downcasting:
///
/// ```rust,ignore
/// let psu = Arc::new(Pl303::with_port(port));
/// let components = DeviceComponents::new()
///     .with_category(DeviceCategory::PowerSupply)
///     .with_power_supply(psu);
/// ```
#[derive(Default)]
pub struct DeviceComponents {
    /// Instrument category
    pub category: Option<DeviceCategory>,
    pub readable: Option<Arc<dyn Readable>>,
    pub multimeter: Option<Arc<dyn Multimeter>>,
    pub data_acquisition: Option<Arc<dyn DataAcquisition>>,
    pub function_generator: Option<Arc<dyn FunctionGenerator>>,
    pub signal_generator: Option<Arc<dyn SignalGenerator>>,
    pub oscilloscope: Option<Arc<dyn Oscilloscope>>,
    pub power_supply: Option<Arc<dyn PowerSupply>>,
    pub electronic_load: Option<Arc<dyn ElectronicLoad>>,
    pub relay_card: Option<Arc<dyn RelayCard>>,
}

impl DeviceComponents {
    /// Create an empty bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Capabilities present in this bag
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps = Vec::new();

        if self.readable.is_some() {
            caps.push(Capability::Readable);
        }
        if self.multimeter.is_some() {
            caps.push(Capability::Multimeter);
        }
        if self.data_acquisition.is_some() {
            caps.push(Capability::DataAcquisition);
        }
        if self.function_generator.is_some() {
            caps.push(Capability::FunctionGenerator);
        }
        if self.signal_generator.is_some() {
            caps.push(Capability::SignalGenerator);
        }
        if self.oscilloscope.is_some() {
            caps.push(Capability::Oscilloscope);
        }
        if self.power_supply.is_some() {
            caps.push(Capability::PowerSupply);
        }
        if self.electronic_load.is_some() {
            caps.push(Capability::ElectronicLoad);
        }
        if self.relay_card.is_some() {
            caps.push(Capability::RelayCard);
        }

        caps
    }

    // Builder methods

    pub fn with_category(mut self, category: DeviceCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_readable(mut self, r: Arc<dyn Readable>) -> Self {
        self.readable = Some(r);
        self
    }

    pub fn with_multimeter(mut self, m: Arc<dyn Multimeter>) -> Self {
        self.multimeter = Some(m);
        self
    }

    pub fn with_data_acquisition(mut self, d: Arc<dyn DataAcquisition>) -> Self {
        self.data_acquisition = Some(d);
        self
    }

    pub fn with_function_generator(mut self, g: Arc<dyn FunctionGenerator>) -> Self {
        self.function_generator = Some(g);
        self
    }

    pub fn with_signal_generator(mut self, g: Arc<dyn SignalGenerator>) -> Self {
        self.signal_generator = Some(g);
        self
    }

    pub fn with_oscilloscope(mut self, o: Arc<dyn Oscilloscope>) -> Self {
        self.oscilloscope = Some(o);
        self
    }

    pub fn with_power_supply(mut self, p: Arc<dyn PowerSupply>) -> Self {
        self.power_supply = Some(p);
        self
    }

    pub fn with_electronic_load(mut self, l: Arc<dyn ElectronicLoad>) -> Self {
        self.electronic_load = Some(l);
        self
    }

    pub fn with_relay_card(mut self, r: Arc<dyn RelayCard>) -> Self {
        self.relay_card = Some(r);
        self
    }
}

impl fmt::Debug for DeviceComponents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceComponents")
            .field("category", &self.category)
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

// =============================================================================
// Driver Factory Trait
// =============================================================================

/// Factory that binds a driver to an open interface.
///
/// Factories are registered once and live for the program's lifetime. `build`
/// returns a `'static` future, so the factory must not hold mutable state
/// across builds.
pub trait DriverFactory: Send + Sync + 'static {
    /// Short unique driver name, e.g. `"a34405"`.
    fn driver_type(&self) -> &'static str;

    /// Human-readable name for listings and error messages.
    fn name(&self) -> &'static str;

    fn manufacturer(&self) -> Manufacturer;

    /// Regular expression matched against the start of the identity string.
    fn id_pattern(&self) -> &'static str;

    /// Capabilities the built driver provides.
    fn capabilities(&self) -> &'static [Capability] {
        &[]
    }

    /// True when `id_pattern` matches at the start of `identity`.
    fn matches(&self, identity: &str) -> Result<bool> {
        let re = Regex::new(&format!("^(?:{})", self.id_pattern()))?;
        Ok(re.is_match(identity))
    }

    /// Build the driver on an open interface.
    ///
    /// Serial drivers open the port named by `interface.resource()`.
    fn build(&self, interface: Arc<dyn Interface>) -> BoxFuture<'static, Result<DeviceComponents>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Gauge;

    #[async_trait]
    impl Readable for Gauge {
        async fn read(&self) -> Result<f64> {
            Ok(12.5)
        }
    }

    struct GaugeFactory;

    impl DriverFactory for GaugeFactory {
        fn driver_type(&self) -> &'static str {
            "gauge"
        }
        fn name(&self) -> &'static str {
            "Test Gauge"
        }
        fn manufacturer(&self) -> Manufacturer {
            Manufacturer::Mitutoyo
        }
        fn id_pattern(&self) -> &'static str {
            r"USB-ITN$"
        }
        fn build(&self, _interface: Arc<dyn Interface>) -> BoxFuture<'static, Result<DeviceComponents>> {
            Box::pin(async { Ok(DeviceComponents::new().with_readable(Arc::new(Gauge))) })
        }
    }

    #[test]
    fn pattern_is_anchored_at_start() {
        let f = GaugeFactory;
        assert!(f.matches("USB-ITN").unwrap());
        assert!(!f.matches("Mitutoyo USB-ITN").unwrap());
        assert!(!f.matches("USB-ITN 2").unwrap());
    }

    #[tokio::test]
    async fn components_report_capabilities() {
        let iface: Arc<dyn Interface> = Arc::new(crate::mock::MockInterface::new("mock", "gauge"));
        let components = GaugeFactory.build(iface).await.unwrap();
        assert_eq!(components.capabilities(), vec![Capability::Readable]);
        let value = components.readable.unwrap().read().await.unwrap();
        assert_eq!(value, 12.5);
    }

    #[test]
    fn manufacturer_display() {
        assert_eq!(Manufacturer::RohdeSchwarz.to_string(), "Rohde & Schwarz");
    }
}
