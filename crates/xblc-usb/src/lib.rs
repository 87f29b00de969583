//! Emulated USB Xbox Live Communicator.
//!
//! [`xblc::XboxLiveCommunicator`] is a [`usb::UsbDeviceModel`]; attach it to a bus port through
//! [`device::AttachedUsbDevice`], which runs the endpoint-0 control pipe and owns the device
//! address.

pub mod config;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod usb;
pub mod xblc;

pub use config::XblcConfig;
pub use device::AttachedUsbDevice;
pub use error::XblcError;
pub use xblc::XboxLiveCommunicator;
