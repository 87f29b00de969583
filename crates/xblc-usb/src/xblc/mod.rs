//! Xbox Live Communicator: a mono microphone and speaker adapter.
//!
//! The device exposes two vendor-class interfaces, each with one isochronous endpoint, and
//! streams mono S16LE PCM between the guest and two host audio channels:
//! - IN endpoint 5: microphone samples pulled from the capture channel
//! - OUT endpoint 4: speaker samples pushed to the playback channel
//!
//! The sample rate is chosen by the guest with a vendor `SET_FEATURE` request and is applied to
//! both channels immediately.

mod channel;
pub mod rates;

pub use channel::ChannelSlot;
pub use rates::{
    index_for_rate, max_capture_backlog_bytes, rate_for_index, DEFAULT_SAMPLE_RATE_HZ,
    SAMPLE_RATES_HZ,
};

use tracing::{debug, trace, warn};
use xblc_audio::{AudioBackend, Direction, PcmFormat};
use xblc_io_snapshot::io::state::{
    IoSnapshot, SnapshotError, SnapshotReader, SnapshotResult, SnapshotVersion, SnapshotWriter,
};

use crate::config::XblcConfig;
use crate::descriptor::{EndpointDescriptor, InterfaceDescriptor, StandardRequests, UsbDescriptor};
use crate::error::Result;
use crate::usb::{
    ControlResponse, SetupPacket, UsbDeviceModel, UsbInResult, UsbOutResult,
    USB_ENDPOINT_XFER_ISOC, USB_REQUEST_SET_FEATURE,
};

pub const XBLC_VENDOR_ID: u16 = 0x045e;
pub const XBLC_PRODUCT_ID: u16 = 0x0283;
pub const XBLC_BCD_DEVICE: u16 = 0x0110;

pub const XBLC_INTERFACE_CLASS: u8 = 0x78;

pub const XBLC_EP_OUT: u8 = 0x04;
pub const XBLC_EP_IN: u8 = 0x85;
pub const XBLC_MAX_PACKET: usize = 48;

/// `bmRequestType` of the vendor requests: host-to-device, vendor, interface.
pub const XBLC_REQUEST_TYPE: u8 = 0x41;
pub const XBLC_SET_SAMPLE_RATE: u16 = 0;
pub const XBLC_SET_AGC: u16 = 1;

const MANUFACTURER: &str = "xemu";
const PRODUCT: &str = "Microsoft Xbox Live Communicator";

fn xblc_descriptor(serial: &str) -> UsbDescriptor {
    let iso_endpoint = |address| EndpointDescriptor {
        address,
        attributes: USB_ENDPOINT_XFER_ISOC,
        max_packet_size: XBLC_MAX_PACKET as u16,
        interval: 1,
        audio: true,
    };
    let interface = |number, endpoint| InterfaceDescriptor {
        number,
        class: XBLC_INTERFACE_CLASS,
        subclass: 0,
        protocol: 0,
        endpoints: vec![endpoint],
    };

    UsbDescriptor {
        bcd_usb: 0x0110,
        max_packet_size0: 8,
        vendor_id: XBLC_VENDOR_ID,
        product_id: XBLC_PRODUCT_ID,
        bcd_device: XBLC_BCD_DEVICE,
        configuration_value: 1,
        configuration_attributes: 0x80,
        max_power: 100,
        interfaces: vec![
            interface(0, iso_endpoint(XBLC_EP_OUT)),
            interface(1, iso_endpoint(XBLC_EP_IN)),
        ],
        strings: vec![MANUFACTURER.into(), PRODUCT.into(), serial.into()],
    }
}

pub struct XboxLiveCommunicator {
    device_index: u8,
    standard: StandardRequests,
    sample_rate: u32,
    auto_gain_control: bool,
    capture: ChannelSlot,
    playback: ChannelSlot,
    dropped_packets: u64,
}

impl XboxLiveCommunicator {
    /// Realizes the device and opens its host channels.
    ///
    /// A channel that cannot be opened is logged and left closed; the device still enumerates
    /// and simply produces silence (capture) or discards audio (playback) for that direction.
    pub fn new(config: XblcConfig, backend: &mut dyn AudioBackend) -> Result<Self> {
        config.validate()?;

        let mut dev = Self {
            device_index: config.device_index,
            standard: StandardRequests::new(xblc_descriptor(&config.serial)),
            sample_rate: DEFAULT_SAMPLE_RATE_HZ,
            auto_gain_control: false,
            capture: ChannelSlot::empty(Direction::Capture),
            playback: ChannelSlot::empty(Direction::Playback),
            dropped_packets: 0,
        };

        let format = dev.format();
        for (slot, enabled) in [
            (&mut dev.capture, config.capture),
            (&mut dev.playback, config.playback),
        ] {
            if !enabled {
                debug!(
                    device_index = dev.device_index,
                    direction = %slot.direction(),
                    "xblc channel disabled by configuration"
                );
                continue;
            }
            if let Err(err) = slot.open(backend, format) {
                warn!(
                    device_index = dev.device_index,
                    direction = %slot.direction(),
                    %err,
                    "xblc failed to open host audio channel"
                );
            }
        }

        Ok(dev)
    }

    pub fn device_index(&self) -> u8 {
        self.device_index
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn auto_gain_control(&self) -> bool {
        self.auto_gain_control
    }

    /// Isochronous packets received on endpoints the device does not declare.
    pub fn dropped_packets(&self) -> u64 {
        self.dropped_packets
    }

    pub fn standard(&self) -> &StandardRequests {
        &self.standard
    }

    pub fn format(&self) -> PcmFormat {
        PcmFormat::mono_s16le(self.sample_rate)
    }

    pub fn capture_format(&self) -> Option<PcmFormat> {
        self.capture.format()
    }

    pub fn playback_format(&self) -> Option<PcmFormat> {
        self.playback.format()
    }

    pub fn is_capture_open(&self) -> bool {
        self.capture.is_open()
    }

    pub fn is_playback_open(&self) -> bool {
        self.playback.is_open()
    }

    /// Selects a rate from the sample-rate table. An out-of-range index leaves the device
    /// untouched.
    pub fn set_sample_rate_index(&mut self, index: u8) -> Result<()> {
        let rate = rate_for_index(index)?;
        let changed = rate != self.sample_rate;
        self.sample_rate = rate;
        self.reconfigure_format();
        if changed {
            // Anything still queued was recorded or mixed at the old rate.
            self.clear_channels();
        }
        debug!(
            device_index = self.device_index,
            rate_hz = rate,
            changed,
            "xblc sample rate set"
        );
        Ok(())
    }

    /// Applies the current sample rate to every open channel.
    pub fn reconfigure_format(&mut self) {
        let format = self.format();
        for slot in [&mut self.capture, &mut self.playback] {
            if let Err(err) = slot.set_format(format) {
                warn!(
                    device_index = self.device_index,
                    direction = %slot.direction(),
                    rate_hz = format.frequency_hz,
                    %err,
                    "xblc failed to change channel format"
                );
            }
        }
    }

    /// Closes both host channels. The device keeps answering requests with silence.
    pub fn detach(&mut self) {
        self.capture.close();
        self.playback.close();
    }

    fn clear_channels(&mut self) {
        for slot in [&mut self.capture, &mut self.playback] {
            if let Err(err) = slot.clear() {
                debug!(
                    device_index = self.device_index,
                    direction = %slot.direction(),
                    %err,
                    "xblc failed to clear channel"
                );
            }
        }
    }

    fn vendor_request(&mut self, setup: SetupPacket) -> ControlResponse {
        match setup.w_index {
            XBLC_SET_SAMPLE_RATE => {
                let index = (setup.w_value & 0xff) as u8;
                match self.set_sample_rate_index(index) {
                    Ok(()) => ControlResponse::Ack,
                    Err(err) => {
                        debug!(device_index = self.device_index, %err, "xblc stall");
                        ControlResponse::Stall
                    }
                }
            }
            XBLC_SET_AGC => {
                self.auto_gain_control = setup.w_value != 0;
                debug!(
                    device_index = self.device_index,
                    agc = self.auto_gain_control,
                    "xblc auto gain control set"
                );
                ControlResponse::Ack
            }
            _ => {
                debug!(
                    device_index = self.device_index,
                    w_index = setup.w_index,
                    "xblc unknown vendor feature"
                );
                ControlResponse::Stall
            }
        }
    }

    /// Builds one capture packet of exactly `len` bytes, zero-padded past the available audio.
    fn capture_packet(&mut self, len: usize) -> Vec<u8> {
        let device_index = self.device_index;
        let max_backlog = max_capture_backlog_bytes(self.sample_rate);
        let Some(ch) = self.capture.channel_mut() else {
            return Vec::new();
        };

        let mut available = ch.available().unwrap_or_else(|err| {
            debug!(device_index, %err, "xblc capture query failed");
            0
        });
        if available > max_backlog {
            debug!(
                device_index,
                bytes = available,
                max_backlog,
                "xblc capture backlog trimmed"
            );
            if let Err(err) = ch.clear() {
                debug!(device_index, %err, "xblc capture clear failed");
            }
            available = 0;
        }

        let mut packet = vec![0u8; len];
        let want = len.min(available);
        let mut filled = 0;
        while filled < want {
            let chunk = (want - filled).min(XBLC_MAX_PACKET);
            match ch.pull(&mut packet[filled..filled + chunk]) {
                // The queue shrank since `available()`; pad the rest.
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) => {
                    debug!(device_index, %err, "xblc capture pull failed");
                    break;
                }
            }
        }

        trace!(device_index, bytes = filled, len, "xblc capture packet");
        packet
    }

    fn drop_packet(&mut self, ep_addr: u8, bytes: usize) {
        self.dropped_packets = self.dropped_packets.saturating_add(1);
        warn!(
            device_index = self.device_index,
            ep_addr,
            bytes,
            dropped = self.dropped_packets,
            "xblc dropped packet on undeclared endpoint"
        );
    }
}

impl core::fmt::Debug for XboxLiveCommunicator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("XboxLiveCommunicator")
            .field("device_index", &self.device_index)
            .field("sample_rate", &self.sample_rate)
            .field("auto_gain_control", &self.auto_gain_control)
            .field("capture", &self.capture)
            .field("playback", &self.playback)
            .field("dropped_packets", &self.dropped_packets)
            .finish()
    }
}

impl UsbDeviceModel for XboxLiveCommunicator {
    fn reset(&mut self) {
        self.standard.reset();
        self.clear_channels();
    }

    fn handle_control_request(
        &mut self,
        setup: SetupPacket,
        _data_stage: Option<&[u8]>,
    ) -> ControlResponse {
        if let Some(resp) = self.standard.handle(setup) {
            return resp;
        }

        match (setup.bm_request_type, setup.b_request) {
            (XBLC_REQUEST_TYPE, USB_REQUEST_SET_FEATURE) => self.vendor_request(setup),
            _ => {
                debug!(
                    device_index = self.device_index,
                    bm_request_type = setup.bm_request_type,
                    b_request = setup.b_request,
                    w_value = setup.w_value,
                    w_index = setup.w_index,
                    "xblc unsupported control request"
                );
                ControlResponse::Stall
            }
        }
    }

    fn handle_in_transfer(&mut self, ep_addr: u8, max_len: usize) -> UsbInResult {
        if ep_addr != XBLC_EP_IN {
            self.drop_packet(ep_addr, max_len);
            return UsbInResult::Data(Vec::new());
        }
        UsbInResult::Data(self.capture_packet(max_len))
    }

    fn handle_out_transfer(&mut self, ep_addr: u8, data: &[u8]) -> UsbOutResult {
        if ep_addr != XBLC_EP_OUT {
            self.drop_packet(ep_addr, data.len());
            return UsbOutResult::Ack;
        }
        let device_index = self.device_index;
        if let Some(ch) = self.playback.channel_mut() {
            match ch.push(data) {
                Ok(()) => trace!(device_index, bytes = data.len(), "xblc playback packet"),
                Err(err) => debug!(device_index, %err, "xblc playback push failed"),
            }
        }
        UsbOutResult::Ack
    }

    fn save_model_state(&self) -> Vec<u8> {
        self.save_state()
    }

    fn load_model_state(&mut self, bytes: &[u8]) -> SnapshotResult<()> {
        self.load_state(bytes)
    }
}

impl IoSnapshot for XboxLiveCommunicator {
    const DEVICE_ID: [u8; 4] = *b"XBLC";
    const DEVICE_VERSION: SnapshotVersion = SnapshotVersion::new(1, 1);

    fn save_state(&self) -> Vec<u8> {
        const TAG_STANDARD: u16 = 1;
        const TAG_SAMPLE_RATE: u16 = 2;

        let mut w = SnapshotWriter::new(Self::DEVICE_ID, Self::DEVICE_VERSION);
        w.field_bytes(TAG_STANDARD, self.standard.save_state());
        // Every table rate fits in 16 bits.
        w.field_u16(TAG_SAMPLE_RATE, self.sample_rate as u16);
        w.finish()
    }

    fn load_state(&mut self, bytes: &[u8]) -> SnapshotResult<()> {
        const TAG_STANDARD: u16 = 1;
        const TAG_SAMPLE_RATE: u16 = 2;

        let r = SnapshotReader::parse(bytes, Self::DEVICE_ID)?;
        r.ensure_device_major(Self::DEVICE_VERSION.major)?;

        // 1.0 snapshots predate the sample-rate field.
        let sample_rate = match r.u16(TAG_SAMPLE_RATE)? {
            Some(rate) => {
                let rate = u32::from(rate);
                if index_for_rate(rate).is_none() {
                    return Err(SnapshotError::InvalidFieldEncoding("xblc sample rate"));
                }
                rate
            }
            None => DEFAULT_SAMPLE_RATE_HZ,
        };

        if let Some(buf) = r.bytes(TAG_STANDARD) {
            self.standard.load_state(buf)?;
        } else {
            self.standard.reset();
        }

        let changed = sample_rate != self.sample_rate;
        self.sample_rate = sample_rate;
        self.auto_gain_control = false;
        self.reconfigure_format();
        if changed {
            self.clear_channels();
        }
        Ok(())
    }
}
