//! Velleman relay cards.

pub mod k8090;

pub use k8090::{Frame, FrameDecoder, K8090, K8090Factory, RelayMask};
