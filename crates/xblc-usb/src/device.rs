use xblc_io_snapshot::io::state::{
    IoSnapshot, SnapshotError, SnapshotReader, SnapshotResult, SnapshotVersion, SnapshotWriter,
};

use crate::usb::{
    ControlResponse, RequestDirection, RequestRecipient, RequestType, SetupPacket,
    UsbDeviceModel, UsbInResult, UsbOutResult, USB_DIR_IN, USB_REQUEST_SET_ADDRESS,
};

/// What endpoint 0 expects next.
#[derive(Debug, Clone, Default)]
enum Ep0 {
    #[default]
    Idle,
    /// Device-to-host data stage; `sent` bytes of `payload` have been delivered.
    DataIn { payload: Vec<u8>, sent: usize },
    /// Host-to-device data stage collecting `setup.w_length` bytes.
    DataOut { setup: SetupPacket, payload: Vec<u8> },
    /// Zero-length status handshake, in the direction of the status token.
    Status(RequestDirection),
}

fn is_set_address(setup: &SetupPacket) -> bool {
    setup.request_type() == RequestType::Standard
        && setup.recipient() == RequestRecipient::Device
        && setup.b_request == USB_REQUEST_SET_ADDRESS
}

/// A USB device attached to an emulated bus port.
///
/// Owns the device address and runs the endpoint-0 SETUP/DATA/STATUS sequence on behalf of a
/// [`UsbDeviceModel`], which only ever sees whole requests. Data endpoints are forwarded to the
/// model with the direction bit applied and IN payloads clamped to the requested length.
pub struct AttachedUsbDevice<M = Box<dyn UsbDeviceModel>> {
    address: u8,
    pending_address: Option<u8>,
    ep0: Ep0,
    model: M,
}

impl<M: UsbDeviceModel> AttachedUsbDevice<M> {
    pub fn new(model: M) -> Self {
        Self {
            address: 0,
            pending_address: None,
            ep0: Ep0::Idle,
            model,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    /// Detach from the bus, handing the model back to the caller.
    pub fn into_model(self) -> M {
        self.model
    }

    pub fn reset(&mut self) {
        self.address = 0;
        self.pending_address = None;
        self.ep0 = Ep0::Idle;
        self.model.reset();
    }

    pub fn handle_setup(&mut self, setup: SetupPacket) -> UsbOutResult {
        // A SETUP token aborts whatever transfer was in flight.
        self.pending_address = None;
        match self.begin_transfer(setup) {
            Some(next) => {
                self.ep0 = next;
                UsbOutResult::Ack
            }
            None => {
                self.ep0 = Ep0::Idle;
                UsbOutResult::Stall
            }
        }
    }

    /// Decides the first stage after SETUP. `None` stalls the transfer.
    fn begin_transfer(&mut self, setup: SetupPacket) -> Option<Ep0> {
        let w_length = usize::from(setup.w_length);

        if setup.request_direction() == RequestDirection::DeviceToHost {
            let mut payload = match self.model.handle_control_request(setup, None) {
                ControlResponse::Data(data) => data,
                ControlResponse::Ack => Vec::new(),
                ControlResponse::Stall => return None,
            };
            payload.truncate(w_length);
            return Some(if payload.is_empty() {
                Ep0::Status(RequestDirection::HostToDevice)
            } else {
                Ep0::DataIn { payload, sent: 0 }
            });
        }

        // SET_ADDRESS never reaches the model; the new address applies after the status stage.
        if is_set_address(&setup) {
            if setup.w_index != 0 || setup.w_length != 0 || setup.w_value > 127 {
                return None;
            }
            self.pending_address = Some(setup.w_value as u8);
            return Some(Ep0::Status(RequestDirection::DeviceToHost));
        }

        if w_length == 0 {
            self.dispatch_out(setup, None)
        } else {
            Some(Ep0::DataOut {
                setup,
                payload: Vec::with_capacity(w_length),
            })
        }
    }

    fn dispatch_out(&mut self, setup: SetupPacket, data: Option<&[u8]>) -> Option<Ep0> {
        match self.model.handle_control_request(setup, data) {
            ControlResponse::Ack => Some(Ep0::Status(RequestDirection::DeviceToHost)),
            ControlResponse::Data(_) | ControlResponse::Stall => None,
        }
    }

    pub fn handle_out(&mut self, endpoint: u8, data: &[u8]) -> UsbOutResult {
        if endpoint != 0 {
            return self.model.handle_out_transfer(endpoint & 0x0f, data);
        }

        let next = match std::mem::take(&mut self.ep0) {
            Ep0::DataOut { setup, mut payload } => {
                let expected = usize::from(setup.w_length);
                if payload.len() + data.len() > expected {
                    None
                } else {
                    payload.extend_from_slice(data);
                    if payload.len() < expected {
                        Some(Ep0::DataOut { setup, payload })
                    } else {
                        self.dispatch_out(setup, Some(payload.as_slice()))
                    }
                }
            }
            // The host may cut an IN data stage short by moving straight to the status stage.
            Ep0::DataIn { .. } | Ep0::Status(RequestDirection::HostToDevice) if data.is_empty() => {
                Some(Ep0::Idle)
            }
            other => {
                self.ep0 = other;
                return UsbOutResult::Stall;
            }
        };

        match next {
            Some(ep0) => {
                self.ep0 = ep0;
                UsbOutResult::Ack
            }
            None => UsbOutResult::Stall,
        }
    }

    pub fn handle_in(&mut self, endpoint: u8, max_len: usize) -> UsbInResult {
        if endpoint == 0 {
            return self.handle_ep0_in(max_len);
        }

        let ep_addr = USB_DIR_IN | (endpoint & 0x0f);
        match self.model.handle_in_transfer(ep_addr, max_len) {
            UsbInResult::Data(mut data) => {
                data.truncate(max_len);
                UsbInResult::Data(data)
            }
            other => other,
        }
    }

    fn handle_ep0_in(&mut self, max_len: usize) -> UsbInResult {
        match std::mem::take(&mut self.ep0) {
            Ep0::DataIn { payload, sent } => {
                let end = payload.len().min(sent.saturating_add(max_len));
                let chunk = payload[sent..end].to_vec();
                self.ep0 = if end == payload.len() {
                    Ep0::Status(RequestDirection::HostToDevice)
                } else {
                    Ep0::DataIn { payload, sent: end }
                };
                UsbInResult::Data(chunk)
            }
            Ep0::Status(RequestDirection::DeviceToHost) => {
                if let Some(addr) = self.pending_address.take() {
                    self.address = addr;
                }
                UsbInResult::Data(Vec::new())
            }
            other => {
                self.ep0 = other;
                UsbInResult::Stall
            }
        }
    }
}

/// Snapshot of the bus-level device state plus the model's own blob.
///
/// In-flight control transfers are not persisted; the guest retries them after restore.
impl<M: UsbDeviceModel> IoSnapshot for AttachedUsbDevice<M> {
    const DEVICE_ID: [u8; 4] = *b"UDEV";
    const DEVICE_VERSION: SnapshotVersion = SnapshotVersion::new(1, 0);

    fn save_state(&self) -> Vec<u8> {
        const TAG_ADDRESS: u16 = 1;
        const TAG_PENDING_ADDRESS: u16 = 2;
        const TAG_MODEL: u16 = 3;

        let mut w = SnapshotWriter::new(Self::DEVICE_ID, Self::DEVICE_VERSION);
        w.field_u8(TAG_ADDRESS, self.address);
        if let Some(addr) = self.pending_address {
            w.field_u8(TAG_PENDING_ADDRESS, addr);
        }
        let model = self.model.save_model_state();
        if !model.is_empty() {
            w.field_bytes(TAG_MODEL, model);
        }
        w.finish()
    }

    fn load_state(&mut self, bytes: &[u8]) -> SnapshotResult<()> {
        const TAG_ADDRESS: u16 = 1;
        const TAG_PENDING_ADDRESS: u16 = 2;
        const TAG_MODEL: u16 = 3;

        let r = SnapshotReader::parse(bytes, Self::DEVICE_ID)?;
        r.ensure_device_major(Self::DEVICE_VERSION.major)?;

        let address = r.u8(TAG_ADDRESS)?.unwrap_or(0);
        if address > 127 {
            return Err(SnapshotError::InvalidFieldEncoding("invalid usb address"));
        }
        let pending_address = r.u8(TAG_PENDING_ADDRESS)?;
        if pending_address.is_some_and(|v| v > 127) {
            return Err(SnapshotError::InvalidFieldEncoding(
                "invalid pending usb address",
            ));
        }
        if let Some(buf) = r.bytes(TAG_MODEL) {
            self.model.load_model_state(buf)?;
        }

        self.address = address;
        // Without the control transfer that set it, a pending address can never be committed.
        self.pending_address = None;
        self.ep0 = Ep0::Idle;
        Ok(())
    }
}
