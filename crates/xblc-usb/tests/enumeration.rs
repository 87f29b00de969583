mod util;

use util::{attach, attach_default, control_in, control_no_data};
use xblc_audio::MemoryBackend;
use xblc_usb::usb::{
    SetupPacket, UsbInResult, UsbOutResult, USB_DESCRIPTOR_TYPE_CONFIGURATION,
    USB_DESCRIPTOR_TYPE_DEVICE, USB_DESCRIPTOR_TYPE_ENDPOINT, USB_DESCRIPTOR_TYPE_INTERFACE,
    USB_DESCRIPTOR_TYPE_STRING, USB_REQUEST_GET_CONFIGURATION, USB_REQUEST_GET_DESCRIPTOR,
    USB_REQUEST_GET_INTERFACE, USB_REQUEST_GET_STATUS, USB_REQUEST_SET_ADDRESS,
    USB_REQUEST_SET_CONFIGURATION, USB_REQUEST_SET_INTERFACE,
};
use xblc_usb::XblcConfig;

fn get_descriptor(desc_type: u8, index: u8, len: u16) -> SetupPacket {
    SetupPacket {
        bm_request_type: 0x80,
        b_request: USB_REQUEST_GET_DESCRIPTOR,
        w_value: (u16::from(desc_type) << 8) | u16::from(index),
        w_index: 0,
        w_length: len,
    }
}

fn standard(
    bm_request_type: u8,
    b_request: u8,
    w_value: u16,
    w_index: u16,
    w_length: u16,
) -> SetupPacket {
    SetupPacket {
        bm_request_type,
        b_request,
        w_value,
        w_index,
        w_length,
    }
}

fn utf16_string(desc: &[u8]) -> String {
    assert_eq!(desc[0] as usize, desc.len());
    assert_eq!(desc[1], USB_DESCRIPTOR_TYPE_STRING);
    let units: Vec<u16> = desc[2..]
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16(&units).unwrap()
}

#[test]
fn device_descriptor_identifies_communicator() {
    let (mut dev, _backend) = attach_default();
    let desc = control_in(&mut dev, get_descriptor(USB_DESCRIPTOR_TYPE_DEVICE, 0, 18));

    assert_eq!(
        desc,
        vec![
            18, 0x01, 0x10, 0x01, 0x00, 0x00, 0x00, 8, 0x5e, 0x04, 0x83, 0x02, 0x10, 0x01, 1, 2,
            3, 1
        ]
    );
}

#[test]
fn device_descriptor_is_delivered_in_ep0_sized_chunks() {
    let (mut dev, _backend) = attach_default();
    assert_eq!(
        dev.handle_setup(get_descriptor(USB_DESCRIPTOR_TYPE_DEVICE, 0, 18)),
        UsbOutResult::Ack
    );

    let mut lens = Vec::new();
    for _ in 0..3 {
        match dev.handle_in(0, 8) {
            UsbInResult::Data(chunk) => lens.push(chunk.len()),
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(lens, vec![8, 8, 2]);
    assert_eq!(dev.handle_out(0, &[]), UsbOutResult::Ack);
}

#[test]
fn short_get_descriptor_is_truncated() {
    let (mut dev, _backend) = attach_default();
    let desc = control_in(&mut dev, get_descriptor(USB_DESCRIPTOR_TYPE_CONFIGURATION, 0, 9));
    assert_eq!(desc.len(), 9);
    assert_eq!(u16::from_le_bytes([desc[2], desc[3]]), 45);
}

#[test]
fn configuration_descriptor_declares_two_isochronous_interfaces() {
    let (mut dev, _backend) = attach_default();
    let cfg = control_in(
        &mut dev,
        get_descriptor(USB_DESCRIPTOR_TYPE_CONFIGURATION, 0, 255),
    );

    assert_eq!(cfg.len(), 45);
    assert_eq!(&cfg[..9], &[9, 0x02, 45, 0, 2, 1, 0, 0x80, 100]);

    // Interface 0: speaker.
    assert_eq!(
        &cfg[9..18],
        &[9, USB_DESCRIPTOR_TYPE_INTERFACE, 0, 0, 1, 0x78, 0, 0, 0]
    );
    assert_eq!(
        &cfg[18..27],
        &[9, USB_DESCRIPTOR_TYPE_ENDPOINT, 0x04, 0x01, 48, 0, 1, 0, 0]
    );

    // Interface 1: microphone.
    assert_eq!(
        &cfg[27..36],
        &[9, USB_DESCRIPTOR_TYPE_INTERFACE, 1, 0, 1, 0x78, 0, 0, 0]
    );
    assert_eq!(
        &cfg[36..45],
        &[9, USB_DESCRIPTOR_TYPE_ENDPOINT, 0x85, 0x01, 48, 0, 1, 0, 0]
    );
}

#[test]
fn string_descriptors() {
    let mut backend = MemoryBackend::new();
    let config = XblcConfig {
        serial: "A1B2".into(),
        ..XblcConfig::default()
    };
    let mut dev = attach(config, &mut backend);

    let langids = control_in(&mut dev, get_descriptor(USB_DESCRIPTOR_TYPE_STRING, 0, 255));
    assert_eq!(langids, vec![4, USB_DESCRIPTOR_TYPE_STRING, 0x09, 0x04]);

    let manufacturer = control_in(&mut dev, get_descriptor(USB_DESCRIPTOR_TYPE_STRING, 1, 255));
    assert_eq!(utf16_string(&manufacturer), "xemu");

    let product = control_in(&mut dev, get_descriptor(USB_DESCRIPTOR_TYPE_STRING, 2, 255));
    assert_eq!(utf16_string(&product), "Microsoft Xbox Live Communicator");

    let serial = control_in(&mut dev, get_descriptor(USB_DESCRIPTOR_TYPE_STRING, 3, 255));
    assert_eq!(utf16_string(&serial), "A1B2");

    assert_eq!(
        dev.handle_setup(get_descriptor(USB_DESCRIPTOR_TYPE_STRING, 4, 255)),
        UsbOutResult::Stall
    );
}

#[test]
fn set_address_takes_effect_after_status_stage() {
    let (mut dev, _backend) = attach_default();
    assert_eq!(
        dev.handle_setup(standard(0x00, USB_REQUEST_SET_ADDRESS, 9, 0, 0)),
        UsbOutResult::Ack
    );
    assert_eq!(dev.address(), 0);
    assert_eq!(dev.handle_in(0, 0), UsbInResult::Data(Vec::new()));
    assert_eq!(dev.address(), 9);

    assert!(!control_no_data(
        &mut dev,
        standard(0x00, USB_REQUEST_SET_ADDRESS, 200, 0, 0)
    ));
    assert_eq!(dev.address(), 9);
}

#[test]
fn configuration_and_interface_requests() {
    let (mut dev, _backend) = attach_default();
    let get_config = standard(0x80, USB_REQUEST_GET_CONFIGURATION, 0, 0, 1);

    assert_eq!(control_in(&mut dev, get_config), vec![0]);
    // Interfaces only exist once configured.
    assert!(!control_no_data(
        &mut dev,
        standard(0x01, USB_REQUEST_SET_INTERFACE, 0, 1, 0)
    ));

    assert!(!control_no_data(
        &mut dev,
        standard(0x00, USB_REQUEST_SET_CONFIGURATION, 2, 0, 0)
    ));
    assert!(control_no_data(
        &mut dev,
        standard(0x00, USB_REQUEST_SET_CONFIGURATION, 1, 0, 0)
    ));
    assert_eq!(control_in(&mut dev, get_config), vec![1]);
    assert_eq!(dev.model().standard().configuration(), 1);

    for iface in 0..2 {
        assert!(control_no_data(
            &mut dev,
            standard(0x01, USB_REQUEST_SET_INTERFACE, 0, iface, 0)
        ));
        assert_eq!(
            control_in(&mut dev, standard(0x81, USB_REQUEST_GET_INTERFACE, 0, iface, 1)),
            vec![0]
        );
    }
    // No alternate settings beyond 0, and no interface 2.
    assert!(!control_no_data(
        &mut dev,
        standard(0x01, USB_REQUEST_SET_INTERFACE, 1, 0, 0)
    ));
    assert!(!control_no_data(
        &mut dev,
        standard(0x01, USB_REQUEST_SET_INTERFACE, 0, 2, 0)
    ));
}

#[test]
fn get_status_for_device_interface_and_endpoints() {
    let (mut dev, _backend) = attach_default();
    let get_status = |recipient: u8, w_index: u16| {
        standard(0x80 | recipient, USB_REQUEST_GET_STATUS, 0, w_index, 2)
    };

    assert_eq!(control_in(&mut dev, get_status(0, 0)), vec![0, 0]);
    assert_eq!(control_in(&mut dev, get_status(1, 1)), vec![0, 0]);
    assert_eq!(control_in(&mut dev, get_status(2, 0x85)), vec![0, 0]);
    assert_eq!(control_in(&mut dev, get_status(2, 0x04)), vec![0, 0]);
    assert_eq!(dev.handle_setup(get_status(2, 0x81)), UsbOutResult::Stall);
}

#[test]
fn bus_reset_returns_to_default_state() {
    let (mut dev, _backend) = attach_default();
    control_no_data(&mut dev, standard(0x00, USB_REQUEST_SET_ADDRESS, 3, 0, 0));
    control_no_data(&mut dev, standard(0x00, USB_REQUEST_SET_CONFIGURATION, 1, 0, 0));
    assert_eq!(dev.address(), 3);

    dev.reset();
    assert_eq!(dev.address(), 0);
    assert_eq!(dev.model().standard().configuration(), 0);
}

#[test]
fn unknown_requests_stall_without_disturbing_the_device() {
    let (mut dev, _backend) = attach_default();

    // Class request to the interface.
    assert!(!control_no_data(&mut dev, standard(0x21, 0x0a, 0, 0, 0)));
    // Vendor IN request.
    assert_eq!(
        dev.handle_setup(standard(0xc1, 0x03, 0, 0, 4)),
        UsbOutResult::Stall
    );

    let desc = control_in(&mut dev, get_descriptor(USB_DESCRIPTOR_TYPE_DEVICE, 0, 18));
    assert_eq!(desc.len(), 18);
}
