//! Instrument registry.
//!
//! Holds the backends and the driver factories, and turns an interface id
//! or a search pattern into a driver:
//!
//! ```rust,ignore
//! let registry = InstrumentRegistry::from_config(&XlabConfig::load()?);
//!
//! for id in registry.list_instruments().await {
//!     println!("{}", id);
//! }
//!
//! // Exactly one listed interface must match, and exactly one driver must
//! // accept its identity
//! let scope = registry.find_instrument("visa:USB0::0x05FF").await?;
//! let trace = scope.components.oscilloscope.unwrap().read_trace("C1").await?;
//! ```

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use regex::Regex;
use tracing::{debug, info, instrument, warn};
use xlab_core::driver::{DeviceComponents, DriverFactory, Manufacturer};
use xlab_core::{split_interface_id, Interface, Result, XlabError};
use xlab_drivers::FactoryRegistry;

use crate::backends::{Backend, MockBackend, SerialPortBackend, TcpipBackend, VisaBackend};
use crate::config::XlabConfig;

/// Registered driver, for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverInfo {
    pub driver_type: String,
    pub name: String,
    pub manufacturer: Manufacturer,
    pub id_pattern: String,
}

/// Interface bound to its driver.
pub struct Instrument {
    pub interface_id: String,
    pub identity: String,
    pub driver_type: String,
    pub interface: Arc<dyn Interface>,
    pub components: DeviceComponents,
}

impl fmt::Debug for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrument")
            .field("interface_id", &self.interface_id)
            .field("identity", &self.identity)
            .field("driver_type", &self.driver_type)
            .field("capabilities", &self.components.capabilities())
            .finish()
    }
}

/// Backends and driver factories.
#[derive(Default)]
pub struct InstrumentRegistry {
    backends: DashMap<String, Arc<dyn Backend>>,
    factories: DashMap<String, Box<dyn DriverFactory>>,
}

impl InstrumentRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the backends enabled in `config` and every built-in
    /// driver.
    pub fn from_config(config: &XlabConfig) -> Self {
        let registry = Self::new();
        if config.visa.enabled {
            registry.register_backend(Arc::new(VisaBackend::new(config.default_timeout())));
        }
        if config.serial.enabled {
            registry.register_backend(Arc::new(SerialPortBackend::new()));
        }
        if config.tcpip.enabled {
            registry.register_backend(Arc::new(TcpipBackend::new(
                config.tcpip.resources.clone(),
                config.default_timeout(),
            )));
        }
        xlab_drivers::register_all(&registry);
        registry
    }

    /// Registry with only a mock backend and every built-in driver.
    pub fn with_mock(mock: Arc<MockBackend>) -> Self {
        let registry = Self::new();
        registry.register_backend(mock);
        xlab_drivers::register_all(&registry);
        registry
    }

    // =========================================================================
    // Backends
    // =========================================================================

    /// Register a backend under its name. Returns the backend it replaced.
    pub fn register_backend(&self, backend: Arc<dyn Backend>) -> Option<Arc<dyn Backend>> {
        debug!(backend = backend.name(), "registering backend");
        self.backends.insert(backend.name().to_string(), backend)
    }

    /// Registered backend names, sorted.
    pub fn backend_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn backend(&self, name: &str) -> Result<Arc<dyn Backend>> {
        self.backends
            .get(name)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| XlabError::BackendNotKnown(name.to_string()))
    }

    /// Interface ids of every resource of every backend, backends in name
    /// order. Backends that fail to list are skipped.
    pub async fn list_instruments(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for name in self.backend_names() {
            let Ok(backend) = self.backend(&name) else {
                continue;
            };
            match backend.list().await {
                Ok(resources) => {
                    ids.extend(resources.into_iter().map(|r| format!("{}:{}", name, r)))
                }
                Err(e) => warn!(backend = %name, error = %e, "listing resources failed"),
            }
        }
        ids
    }

    /// Open the interface named by `interface_id`.
    #[instrument(skip(self), err)]
    pub async fn get_interface(&self, interface_id: &str) -> Result<Arc<dyn Interface>> {
        let (backend, resource) = split_interface_id(interface_id)?;
        self.backend(backend)?.open(resource).await
    }

    // =========================================================================
    // Drivers
    // =========================================================================

    /// Register a driver factory. Returns the factory it replaced.
    pub fn register_factory(&self, factory: Box<dyn DriverFactory>) -> Option<Box<dyn DriverFactory>> {
        let driver_type = factory.driver_type().to_string();
        debug!(
            driver_type = %driver_type,
            name = factory.name(),
            capabilities = ?factory.capabilities(),
            "registering driver factory"
        );
        self.factories.insert(driver_type, factory)
    }

    /// Every registered driver, sorted by driver type.
    pub fn list_drivers(&self) -> Vec<DriverInfo> {
        let mut drivers: Vec<DriverInfo> = self
            .factories
            .iter()
            .map(|entry| {
                let factory = entry.value();
                DriverInfo {
                    driver_type: factory.driver_type().to_string(),
                    name: factory.name().to_string(),
                    manufacturer: factory.manufacturer(),
                    id_pattern: factory.id_pattern().to_string(),
                }
            })
            .collect();
        drivers.sort_by(|a, b| a.driver_type.cmp(&b.driver_type));
        drivers
    }

    /// Driver types whose pattern matches `identity`, sorted.
    pub fn matching_drivers(&self, identity: &str) -> Result<Vec<String>> {
        let mut matches = Vec::new();
        for entry in self.factories.iter() {
            if entry.value().matches(identity)? {
                matches.push(entry.key().clone());
            }
        }
        matches.sort();
        Ok(matches)
    }

    /// Open an interface, identify the instrument and build its driver.
    #[instrument(skip(self), err)]
    pub async fn get_instrument(&self, interface_id: &str) -> Result<Instrument> {
        let interface = self.get_interface(interface_id).await?;
        let identity = interface.identify().await?;
        debug!(identity = %identity, "instrument identified");

        let mut drivers = self.matching_drivers(&identity)?;
        let driver_type = match drivers.len() {
            0 => {
                return Err(XlabError::NoDriver {
                    identity,
                    interface: interface_id.to_string(),
                })
            }
            1 => drivers.remove(0),
            _ => {
                return Err(XlabError::MultipleDrivers {
                    identity,
                    interface: interface_id.to_string(),
                    drivers,
                })
            }
        };

        let build = self
            .factories
            .get(&driver_type)
            .map(|factory| factory.build(Arc::clone(&interface)))
            .ok_or_else(|| XlabError::NotAvailable(format!("driver {} vanished", driver_type)))?;
        let components = build.await?;

        info!(interface = interface_id, driver = %driver_type, "instrument ready");
        Ok(Instrument {
            interface_id: interface_id.to_string(),
            identity,
            driver_type,
            interface,
            components,
        })
    }

    /// Interface ids matching `pattern`, anchored at the start.
    pub async fn find_interfaces(&self, pattern: &str) -> Result<Vec<String>> {
        let re = Regex::new(&format!("^(?:{})", pattern))?;
        Ok(self
            .list_instruments()
            .await
            .into_iter()
            .filter(|id| re.is_match(id))
            .collect())
    }

    /// The one instrument whose interface id matches `pattern`.
    #[instrument(skip(self), err)]
    pub async fn find_instrument(&self, pattern: &str) -> Result<Instrument> {
        let mut matches = self.find_interfaces(pattern).await?;
        match matches.len() {
            0 => Err(XlabError::NoMatch(pattern.to_string())),
            1 => self.get_instrument(&matches.remove(0)).await,
            _ => Err(XlabError::MultipleMatches {
                pattern: pattern.to_string(),
                matches,
            }),
        }
    }
}

impl FactoryRegistry for InstrumentRegistry {
    fn register_factory(&self, factory: Box<dyn DriverFactory>) {
        InstrumentRegistry::register_factory(self, factory);
    }
}

impl fmt::Debug for InstrumentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut drivers: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        drivers.sort();
        f.debug_struct("InstrumentRegistry")
            .field("backends", &self.backend_names())
            .field("drivers", &drivers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xlab_core::mock::MockInterface;

    fn registry() -> (Arc<MockBackend>, InstrumentRegistry) {
        let mock = Arc::new(
            MockBackend::new()
                .with(
                    MockInterface::new("mock", "dmm1")
                        .with_identity("Agilent Technologies,34405A,MY1,1.0"),
                )
                .with(
                    MockInterface::new("mock", "dmm2")
                        .with_identity("Agilent Technologies,34450A,MY2,1.0"),
                )
                .with(MockInterface::new("mock", "unknown").with_identity("ACME,WIDGET,1,1")),
        );
        (Arc::clone(&mock), InstrumentRegistry::with_mock(mock))
    }

    #[tokio::test]
    async fn lists_interfaces_per_backend() {
        let (_, registry) = registry();
        assert_eq!(
            registry.list_instruments().await,
            vec!["mock:dmm1", "mock:dmm2", "mock:unknown"]
        );
    }

    #[tokio::test]
    async fn unknown_backend() {
        let (_, registry) = registry();
        assert!(matches!(
            registry.get_interface("gpib:1").await,
            Err(XlabError::BackendNotKnown(_))
        ));
        assert!(matches!(
            registry.get_interface("nocolon").await,
            Err(XlabError::InvalidInterfaceId(_))
        ));
    }

    #[tokio::test]
    async fn get_instrument_picks_the_driver() {
        let (_, registry) = registry();
        let instrument = registry.get_instrument("mock:dmm2").await.unwrap();
        assert_eq!(instrument.driver_type, "a34450");
        assert!(instrument.components.multimeter.is_some());

        assert!(matches!(
            registry.get_instrument("mock:unknown").await,
            Err(XlabError::NoDriver { .. })
        ));
    }

    #[tokio::test]
    async fn ambiguous_driver_patterns_are_reported() {
        let (_, registry) = registry();
        struct CatchAll;
        impl DriverFactory for CatchAll {
            fn driver_type(&self) -> &'static str {
                "catch_all"
            }
            fn name(&self) -> &'static str {
                "Catch all"
            }
            fn manufacturer(&self) -> Manufacturer {
                Manufacturer::Agilent
            }
            fn id_pattern(&self) -> &'static str {
                "Agilent"
            }
            fn build(
                &self,
                _interface: Arc<dyn Interface>,
            ) -> futures::future::BoxFuture<'static, Result<DeviceComponents>> {
                Box::pin(async { Ok(DeviceComponents::new()) })
            }
        }
        registry.register_factory(Box::new(CatchAll));

        match registry.get_instrument("mock:dmm1").await {
            Err(XlabError::MultipleDrivers { drivers, .. }) => {
                assert_eq!(drivers, vec!["a34405", "catch_all"])
            }
            other => panic!("expected MultipleDrivers, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn find_requires_exactly_one_match() {
        let (_, registry) = registry();
        assert_eq!(
            registry.find_instrument("mock:dmm1").await.unwrap().driver_type,
            "a34405"
        );
        assert!(matches!(
            registry.find_instrument("mock:dmm").await,
            Err(XlabError::MultipleMatches { .. })
        ));
        assert!(matches!(
            registry.find_instrument("visa:").await,
            Err(XlabError::NoMatch(_))
        ));
        // Anchored at the start
        assert!(matches!(
            registry.find_instrument("dmm1").await,
            Err(XlabError::NoMatch(_))
        ));
    }

    #[test]
    fn drivers_are_listed_sorted() {
        let registry = InstrumentRegistry::from_config(&XlabConfig::default());
        let drivers = registry.list_drivers();
        assert_eq!(drivers.len(), 11);
        assert!(drivers.windows(2).all(|w| w[0].driver_type < w[1].driver_type));
        assert_eq!(registry.backend_names(), vec!["serialport", "tcpip", "visa"]);
    }
}
