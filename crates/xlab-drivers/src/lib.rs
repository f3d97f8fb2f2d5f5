//! Instrument drivers for xlab.
//!
//! One module per manufacturer. Each driver comes with a [`DriverFactory`]
//! that recognises the instrument by its identification string and builds
//! the driver on top of an [`Interface`](xlab_core::Interface).
//!
//! # Available Drivers
//!
//! | manufacturer | driver type | instrument |
//! |--------------|-------------|------------|
//! | Agilent | `a34405`, `a34450` | 34405A / 34450A multimeters |
//! | Agilent | `a34972` | 34972A data acquisition unit |
//! | Agilent | `a33xxx` | 33xxx function generators |
//! | LeCroy | `hdo6xxx`, `ws104` | X-Stream oscilloscopes |
//! | Mitutoyo | `usb_itn` | Digimatic gauges on a USB-ITN cable |
//! | Rohde & Schwarz | `sml01` | SML01 signal generator |
//! | TTI | `pl303`, `ld400` | PL303 supply, LD400 electronic load |
//! | Velleman | `k8090` | K8090 relay card |
//!
//! ```rust,ignore
//! use xlab_drivers::register_all;
//! use xlab_hardware::InstrumentRegistry;
//!
//! let registry = InstrumentRegistry::new();
//! register_all(&registry);
//! ```

pub mod agilent;
pub mod lecroy;
pub mod mitutoyo;
pub mod rohdeschwarz;
pub mod tti;
pub mod velleman;

use xlab_core::driver::DriverFactory;

pub use agilent::{A33xxxFactory, A34405Factory, A34450Factory, A34972Factory};
pub use lecroy::{Hdo6xxxFactory, Ws104Factory};
pub use mitutoyo::UsbItnFactory;
pub use rohdeschwarz::Sml01Factory;
pub use tti::{Ld400Factory, Pl303Factory};
pub use velleman::K8090Factory;

/// Every driver factory in this crate.
pub fn all_factories() -> Vec<Box<dyn DriverFactory>> {
    vec![
        Box::new(A34405Factory),
        Box::new(A34450Factory),
        Box::new(A34972Factory),
        Box::new(A33xxxFactory),
        Box::new(Hdo6xxxFactory),
        Box::new(Ws104Factory),
        Box::new(UsbItnFactory),
        Box::new(Sml01Factory),
        Box::new(Pl303Factory),
        Box::new(Ld400Factory),
        Box::new(K8090Factory),
    ]
}

/// Registries that accept driver factories.
///
/// Lets this crate register its drivers without depending on
/// `xlab-hardware`.
pub trait FactoryRegistry {
    fn register_factory(&self, factory: Box<dyn DriverFactory>);
}

/// Register every driver factory with `registry`.
pub fn register_all(registry: &impl FactoryRegistry) {
    for factory in all_factories() {
        registry.register_factory(factory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<&'static str>>);

    impl FactoryRegistry for Collect {
        fn register_factory(&self, factory: Box<dyn DriverFactory>) {
            self.0.lock().unwrap().push(factory.driver_type());
        }
    }

    #[test]
    fn driver_types_are_unique() {
        let registry = Collect::default();
        register_all(&registry);
        let types = registry.0.into_inner().unwrap();
        let unique: HashSet<_> = types.iter().collect();
        assert_eq!(types.len(), 11);
        assert_eq!(unique.len(), types.len());
    }

    #[test]
    fn id_patterns_compile() {
        for factory in all_factories() {
            assert!(factory.matches("").is_ok(), "{}", factory.driver_type());
        }
    }
}
