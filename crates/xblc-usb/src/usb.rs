//! Request-level USB device model interface.
//!
//! Device models operate on whole SETUP requests and whole data-endpoint packets. The
//! endpoint-0 transaction state machine (SETUP/DATA/STATUS stages, `SET_ADDRESS`) lives in
//! [`crate::device::AttachedUsbDevice`].

use xblc_io_snapshot::io::state::SnapshotResult;

pub const USB_DIR_IN: u8 = 0x80;

pub const USB_REQUEST_GET_STATUS: u8 = 0x00;
pub const USB_REQUEST_CLEAR_FEATURE: u8 = 0x01;
pub const USB_REQUEST_SET_FEATURE: u8 = 0x03;
pub const USB_REQUEST_SET_ADDRESS: u8 = 0x05;
pub const USB_REQUEST_GET_DESCRIPTOR: u8 = 0x06;
pub const USB_REQUEST_GET_CONFIGURATION: u8 = 0x08;
pub const USB_REQUEST_SET_CONFIGURATION: u8 = 0x09;
pub const USB_REQUEST_GET_INTERFACE: u8 = 0x0A;
pub const USB_REQUEST_SET_INTERFACE: u8 = 0x0B;

pub const USB_DESCRIPTOR_TYPE_DEVICE: u8 = 0x01;
pub const USB_DESCRIPTOR_TYPE_CONFIGURATION: u8 = 0x02;
pub const USB_DESCRIPTOR_TYPE_STRING: u8 = 0x03;
pub const USB_DESCRIPTOR_TYPE_INTERFACE: u8 = 0x04;
pub const USB_DESCRIPTOR_TYPE_ENDPOINT: u8 = 0x05;

pub const USB_ENDPOINT_XFER_ISOC: u8 = 0x01;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetupPacket {
    pub bm_request_type: u8,
    pub b_request: u8,
    pub w_value: u16,
    pub w_index: u16,
    pub w_length: u16,
}

impl SetupPacket {
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self {
            bm_request_type: bytes[0],
            b_request: bytes[1],
            w_value: u16::from_le_bytes([bytes[2], bytes[3]]),
            w_index: u16::from_le_bytes([bytes[4], bytes[5]]),
            w_length: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }

    pub fn request_direction(&self) -> RequestDirection {
        if (self.bm_request_type & USB_DIR_IN) != 0 {
            RequestDirection::DeviceToHost
        } else {
            RequestDirection::HostToDevice
        }
    }

    pub fn request_type(&self) -> RequestType {
        match (self.bm_request_type >> 5) & 0x03 {
            0 => RequestType::Standard,
            1 => RequestType::Class,
            2 => RequestType::Vendor,
            _ => RequestType::Reserved,
        }
    }

    pub fn recipient(&self) -> RequestRecipient {
        match self.bm_request_type & 0x1f {
            0 => RequestRecipient::Device,
            1 => RequestRecipient::Interface,
            2 => RequestRecipient::Endpoint,
            _ => RequestRecipient::Other,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestDirection {
    HostToDevice,
    DeviceToHost,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestType {
    Standard,
    Class,
    Vendor,
    Reserved,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestRecipient {
    Device,
    Interface,
    Endpoint,
    Other,
}

/// Outcome of a control request at the model level.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlResponse {
    Data(Vec<u8>),
    Ack,
    Stall,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UsbInResult {
    Data(Vec<u8>),
    Nak,
    Stall,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UsbOutResult {
    Ack,
    Nak,
    Stall,
}

/// A USB function as seen by the bus.
///
/// `ep_addr` arguments carry the direction bit (`0x80` for IN) so a model can reject traffic on
/// endpoints it does not declare.
pub trait UsbDeviceModel: Send {
    /// Bus reset.
    fn reset(&mut self) {}

    fn handle_control_request(
        &mut self,
        setup: SetupPacket,
        data_stage: Option<&[u8]>,
    ) -> ControlResponse;

    fn handle_in_transfer(&mut self, ep_addr: u8, max_len: usize) -> UsbInResult;

    fn handle_out_transfer(&mut self, ep_addr: u8, data: &[u8]) -> UsbOutResult;

    /// Model-specific snapshot blob. Models without persistent state return an empty vector.
    fn save_model_state(&self) -> Vec<u8> {
        Vec::new()
    }

    fn load_model_state(&mut self, _bytes: &[u8]) -> SnapshotResult<()> {
        Ok(())
    }
}

impl<T: UsbDeviceModel + ?Sized> UsbDeviceModel for Box<T> {
    fn reset(&mut self) {
        (**self).reset();
    }

    fn handle_control_request(
        &mut self,
        setup: SetupPacket,
        data_stage: Option<&[u8]>,
    ) -> ControlResponse {
        (**self).handle_control_request(setup, data_stage)
    }

    fn handle_in_transfer(&mut self, ep_addr: u8, max_len: usize) -> UsbInResult {
        (**self).handle_in_transfer(ep_addr, max_len)
    }

    fn handle_out_transfer(&mut self, ep_addr: u8, data: &[u8]) -> UsbOutResult {
        (**self).handle_out_transfer(ep_addr, data)
    }

    fn save_model_state(&self) -> Vec<u8> {
        (**self).save_model_state()
    }

    fn load_model_state(&mut self, bytes: &[u8]) -> SnapshotResult<()> {
        (**self).load_model_state(bytes)
    }
}
