//! Descriptor tree and the standard (chapter 9) request layer.
//!
//! [`StandardRequests`] answers the requests every device must support from a static
//! [`UsbDescriptor`] and tracks the little state they mutate (configuration and alternate
//! settings). Requests it does not resolve are returned as `None` so the device model can
//! decide what to do with them.

use xblc_io_snapshot::io::state::codec::{Decoder, Encoder};
use xblc_io_snapshot::io::state::{
    IoSnapshot, SnapshotError, SnapshotReader, SnapshotResult, SnapshotVersion, SnapshotWriter,
};

use crate::usb::{
    ControlResponse, SetupPacket, USB_DESCRIPTOR_TYPE_CONFIGURATION, USB_DESCRIPTOR_TYPE_DEVICE,
    USB_DESCRIPTOR_TYPE_ENDPOINT, USB_DESCRIPTOR_TYPE_INTERFACE, USB_DESCRIPTOR_TYPE_STRING,
    USB_REQUEST_GET_CONFIGURATION, USB_REQUEST_GET_DESCRIPTOR, USB_REQUEST_GET_INTERFACE,
    USB_REQUEST_GET_STATUS, USB_REQUEST_SET_CONFIGURATION, USB_REQUEST_SET_INTERFACE,
};

const LANGID_EN_US: u16 = 0x0409;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
    /// Audio-class endpoints carry two extra bytes (`bRefresh`, `bSynchAddress`).
    pub audio: bool,
}

impl EndpointDescriptor {
    fn encode(&self, out: &mut Vec<u8>) {
        let [mp0, mp1] = self.max_packet_size.to_le_bytes();
        let len = if self.audio { 9 } else { 7 };
        out.extend_from_slice(&[
            len,
            USB_DESCRIPTOR_TYPE_ENDPOINT,
            self.address,
            self.attributes,
            mp0,
            mp1,
            self.interval,
        ]);
        if self.audio {
            out.extend_from_slice(&[0, 0]);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub endpoints: Vec<EndpointDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDescriptor {
    pub bcd_usb: u16,
    pub max_packet_size0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub bcd_device: u16,
    pub configuration_value: u8,
    pub configuration_attributes: u8,
    pub max_power: u8,
    pub interfaces: Vec<InterfaceDescriptor>,
    /// String descriptors 1..=N; index 0 is the LANGID table.
    pub strings: Vec<String>,
}

impl UsbDescriptor {
    // String indices are fixed: 1 = manufacturer, 2 = product, 3 = serial number.
    fn string_index(&self, index: u8) -> u8 {
        if (index as usize) <= self.strings.len() {
            index
        } else {
            0
        }
    }

    pub fn device_descriptor(&self) -> [u8; 18] {
        let [usb0, usb1] = self.bcd_usb.to_le_bytes();
        let [vid0, vid1] = self.vendor_id.to_le_bytes();
        let [pid0, pid1] = self.product_id.to_le_bytes();
        let [dev0, dev1] = self.bcd_device.to_le_bytes();
        [
            18,
            USB_DESCRIPTOR_TYPE_DEVICE,
            usb0,
            usb1,
            0x00, // class defined per interface
            0x00,
            0x00,
            self.max_packet_size0,
            vid0,
            vid1,
            pid0,
            pid1,
            dev0,
            dev1,
            self.string_index(1),
            self.string_index(2),
            self.string_index(3),
            1, // bNumConfigurations
        ]
    }

    pub fn configuration_descriptor(&self) -> Vec<u8> {
        let mut out = vec![
            9,
            USB_DESCRIPTOR_TYPE_CONFIGURATION,
            0,
            0, // wTotalLength, patched below
            self.interfaces.len() as u8,
            self.configuration_value,
            0,
            self.configuration_attributes,
            self.max_power,
        ];
        for iface in &self.interfaces {
            out.extend_from_slice(&[
                9,
                USB_DESCRIPTOR_TYPE_INTERFACE,
                iface.number,
                0,
                iface.endpoints.len() as u8,
                iface.class,
                iface.subclass,
                iface.protocol,
                0,
            ]);
            for ep in &iface.endpoints {
                ep.encode(&mut out);
            }
        }
        let [tl0, tl1] = (out.len() as u16).to_le_bytes();
        out[2] = tl0;
        out[3] = tl1;
        out
    }

    pub fn string_descriptor(&self, index: u8) -> Option<Vec<u8>> {
        if index == 0 {
            let [l0, l1] = LANGID_EN_US.to_le_bytes();
            return Some(vec![4, USB_DESCRIPTOR_TYPE_STRING, l0, l1]);
        }
        let s = self.strings.get(index as usize - 1)?;
        let mut out = Vec::with_capacity(2 + s.len() * 2);
        out.push(0); // bLength placeholder
        out.push(USB_DESCRIPTOR_TYPE_STRING);
        for unit in s.encode_utf16().take(126) {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out[0] = out.len() as u8;
        Some(out)
    }

    fn has_interface(&self, number: u16) -> bool {
        self.interfaces.iter().any(|i| u16::from(i.number) == number)
    }

    fn has_endpoint(&self, address: u16) -> bool {
        address & 0x7f == 0
            || self
                .interfaces
                .iter()
                .flat_map(|i| i.endpoints.iter())
                .any(|ep| u16::from(ep.address) == address)
    }
}

/// State owned by the standard request layer.
#[derive(Debug, Clone)]
pub struct StandardRequests {
    descriptor: UsbDescriptor,
    configuration: u8,
    alt_settings: Vec<u8>,
}

impl StandardRequests {
    pub fn new(descriptor: UsbDescriptor) -> Self {
        let alt_settings = vec![0; descriptor.interfaces.len()];
        Self {
            descriptor,
            configuration: 0,
            alt_settings,
        }
    }

    pub fn descriptor(&self) -> &UsbDescriptor {
        &self.descriptor
    }

    pub fn configuration(&self) -> u8 {
        self.configuration
    }

    pub fn is_configured(&self) -> bool {
        self.configuration != 0
    }

    pub fn reset(&mut self) {
        self.configuration = 0;
        self.alt_settings.fill(0);
    }

    /// Resolve a standard request. `None` means the request is not one this layer answers.
    pub fn handle(&mut self, setup: SetupPacket) -> Option<ControlResponse> {
        match (setup.bm_request_type, setup.b_request) {
            (0x80, USB_REQUEST_GET_DESCRIPTOR) => {
                let desc_type = (setup.w_value >> 8) as u8;
                let index = (setup.w_value & 0xff) as u8;
                let data = match desc_type {
                    USB_DESCRIPTOR_TYPE_DEVICE => self.descriptor.device_descriptor().to_vec(),
                    USB_DESCRIPTOR_TYPE_CONFIGURATION if index == 0 => {
                        self.descriptor.configuration_descriptor()
                    }
                    USB_DESCRIPTOR_TYPE_STRING => self.descriptor.string_descriptor(index)?,
                    _ => return None,
                };
                Some(ControlResponse::Data(data))
            }
            (0x80, USB_REQUEST_GET_STATUS) => {
                // Bus powered, no remote wakeup.
                (setup.w_value == 0 && setup.w_index == 0)
                    .then(|| ControlResponse::Data(vec![0, 0]))
            }
            (0x81, USB_REQUEST_GET_STATUS) => {
                (setup.w_value == 0 && self.descriptor.has_interface(setup.w_index))
                    .then(|| ControlResponse::Data(vec![0, 0]))
            }
            (0x82, USB_REQUEST_GET_STATUS) => {
                // Isochronous endpoints have no halt feature.
                (setup.w_value == 0 && self.descriptor.has_endpoint(setup.w_index))
                    .then(|| ControlResponse::Data(vec![0, 0]))
            }
            (0x80, USB_REQUEST_GET_CONFIGURATION) => {
                Some(ControlResponse::Data(vec![self.configuration]))
            }
            (0x00, USB_REQUEST_SET_CONFIGURATION) => {
                if setup.w_index != 0 || (setup.w_value & 0xff00) != 0 {
                    return None;
                }
                let cfg = (setup.w_value & 0xff) as u8;
                if cfg != 0 && cfg != self.descriptor.configuration_value {
                    return None;
                }
                self.configuration = cfg;
                self.alt_settings.fill(0);
                Some(ControlResponse::Ack)
            }
            (0x81, USB_REQUEST_GET_INTERFACE) => {
                if !self.is_configured() || setup.w_value != 0 {
                    return None;
                }
                let alt = self.interface_slot(setup.w_index)?;
                Some(ControlResponse::Data(vec![self.alt_settings[alt]]))
            }
            (0x01, USB_REQUEST_SET_INTERFACE) => {
                if !self.is_configured() || setup.w_value != 0 {
                    return None;
                }
                let alt = self.interface_slot(setup.w_index)?;
                self.alt_settings[alt] = 0;
                Some(ControlResponse::Ack)
            }
            _ => None,
        }
    }

    fn interface_slot(&self, number: u16) -> Option<usize> {
        self.descriptor
            .interfaces
            .iter()
            .position(|i| u16::from(i.number) == number)
    }
}

impl IoSnapshot for StandardRequests {
    const DEVICE_ID: [u8; 4] = *b"USBD";
    const DEVICE_VERSION: SnapshotVersion = SnapshotVersion::new(1, 0);

    fn save_state(&self) -> Vec<u8> {
        const TAG_CONFIGURATION: u16 = 1;
        const TAG_ALT_SETTINGS: u16 = 2;

        let mut w = SnapshotWriter::new(Self::DEVICE_ID, Self::DEVICE_VERSION);
        w.field_u8(TAG_CONFIGURATION, self.configuration);
        w.field_bytes(
            TAG_ALT_SETTINGS,
            Encoder::new().vec_u8(&self.alt_settings).finish(),
        );
        w.finish()
    }

    fn load_state(&mut self, bytes: &[u8]) -> SnapshotResult<()> {
        const TAG_CONFIGURATION: u16 = 1;
        const TAG_ALT_SETTINGS: u16 = 2;

        let r = SnapshotReader::parse(bytes, Self::DEVICE_ID)?;
        r.ensure_device_major(Self::DEVICE_VERSION.major)?;

        let configuration = r.u8(TAG_CONFIGURATION)?.unwrap_or(0);
        if configuration != 0 && configuration != self.descriptor.configuration_value {
            return Err(SnapshotError::InvalidFieldEncoding("invalid configuration"));
        }

        let mut alt_settings = vec![0; self.descriptor.interfaces.len()];
        if let Some(buf) = r.bytes(TAG_ALT_SETTINGS) {
            let mut d = Decoder::new(buf);
            let saved = d.vec_u8(alt_settings.len())?;
            d.finish()?;
            if saved.iter().any(|&alt| alt != 0) {
                return Err(SnapshotError::InvalidFieldEncoding("invalid alternate setting"));
            }
            alt_settings[..saved.len()].copy_from_slice(&saved);
        }

        self.configuration = configuration;
        self.alt_settings = alt_settings;
        Ok(())
    }
}
