//! Mitutoyo Digimatic gauges, read through the USB-ITN cable.

pub mod usb_itn;

pub use usb_itn::{UsbItn, UsbItnFactory};
