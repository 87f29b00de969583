#![allow(dead_code)]

use xblc_audio::{Direction, HostEnd, MemoryBackend};
use xblc_usb::usb::{SetupPacket, UsbInResult, UsbOutResult, USB_REQUEST_SET_FEATURE};
use xblc_usb::xblc::{XBLC_REQUEST_TYPE, XBLC_SET_AGC, XBLC_SET_SAMPLE_RATE};
use xblc_usb::{AttachedUsbDevice, XblcConfig, XboxLiveCommunicator};

pub type Xblc = AttachedUsbDevice<XboxLiveCommunicator>;

/// Routes device logs through the test harness so `cargo test -- --nocapture` shows them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

pub fn attach(config: XblcConfig, backend: &mut MemoryBackend) -> Xblc {
    init_tracing();
    AttachedUsbDevice::new(XboxLiveCommunicator::new(config, backend).unwrap())
}

/// A communicator with both channels open on a fresh in-memory backend.
pub fn attach_default() -> (Xblc, MemoryBackend) {
    let mut backend = MemoryBackend::new();
    let dev = attach(XblcConfig::default(), &mut backend);
    (dev, backend)
}

pub fn capture_host(backend: &MemoryBackend) -> HostEnd {
    backend.host(Direction::Capture).unwrap()
}

pub fn playback_host(backend: &MemoryBackend) -> HostEnd {
    backend.host(Direction::Playback).unwrap()
}

pub fn control_in(dev: &mut Xblc, setup: SetupPacket) -> Vec<u8> {
    assert_eq!(dev.handle_setup(setup), UsbOutResult::Ack);

    let mut out = Vec::new();
    loop {
        match dev.handle_in(0, 64) {
            UsbInResult::Data(chunk) => {
                let done = chunk.len() < 64;
                out.extend_from_slice(&chunk);
                if done {
                    break;
                }
            }
            UsbInResult::Nak | UsbInResult::Stall => panic!("expected control IN data"),
        }
    }

    // Status stage (OUT ZLP).
    assert_eq!(dev.handle_out(0, &[]), UsbOutResult::Ack);
    out
}

/// Runs a no-data control transfer. Returns `false` when the device stalls it.
pub fn control_no_data(dev: &mut Xblc, setup: SetupPacket) -> bool {
    if dev.handle_setup(setup) == UsbOutResult::Stall {
        return false;
    }
    match dev.handle_in(0, 0) {
        UsbInResult::Data(data) => {
            assert!(data.is_empty());
            true
        }
        UsbInResult::Nak | UsbInResult::Stall => false,
    }
}

pub fn vendor_setup(w_value: u16, w_index: u16) -> SetupPacket {
    SetupPacket {
        bm_request_type: XBLC_REQUEST_TYPE,
        b_request: USB_REQUEST_SET_FEATURE,
        w_value,
        w_index,
        w_length: 0,
    }
}

pub fn set_sample_rate_index(dev: &mut Xblc, index: u8) -> bool {
    control_no_data(dev, vendor_setup(u16::from(index), XBLC_SET_SAMPLE_RATE))
}

pub fn set_agc(dev: &mut Xblc, on: bool) -> bool {
    control_no_data(dev, vendor_setup(u16::from(on), XBLC_SET_AGC))
}

/// One microphone packet as the guest would request it.
pub fn capture(dev: &mut Xblc, len: usize) -> Vec<u8> {
    match dev.handle_in(5, len) {
        UsbInResult::Data(data) => data,
        other => panic!("unexpected capture result {other:?}"),
    }
}

pub fn playback(dev: &mut Xblc, data: &[u8]) -> UsbOutResult {
    dev.handle_out(4, data)
}
