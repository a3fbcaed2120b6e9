//! Virtual device session state machine (C5).
//!
//! Grounded on the teacher's `usb::device::Device` (`xhcid`'s per-device
//! state plus `HubDescriptor`-typed parent) and on `usbhubd`'s
//! `XhciClientHandle`: a session owns one [`Registry`] and walks a
//! strictly-ordered state machine as the import handshake and descriptor
//! fetch progress, the same way the teacher's device object only becomes
//! usable once its endpoint contexts are configured.

use std::collections::HashMap;
use std::io;
use std::sync::Mutex;

use crate::descriptor::{
    self, ConfigDescriptor, DescriptorKind, DeviceDescriptor, CONFIG_DESCRIPTOR_HEADER_LEN, DEVICE_DESCRIPTOR_LEN,
};
use crate::dispatcher::Dispatcher;
use crate::error::{SessionError, WireError};
use crate::registry::Registry;
use crate::urb::Urb;
use crate::wire::ImportReply;

/// String descriptors read during enumeration (§3, §4.5): the language-ID
/// list from index 0, and every other index actually read, keyed by its
/// index (`iManufacturer`, `iProduct`, `iSerialNumber`, `iConfiguration`).
#[derive(Debug, Clone, Default)]
pub struct Strings {
    pub language_ids: Vec<u16>,
    pub by_index: HashMap<u8, String>,
}

/// USB generation, carried as `speed` in `op_import_reply` and
/// `usbip_device_status`. Numeric values match the Linux `usb_device_speed`
/// enum the wire protocol was defined against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    Unknown,
    Low,
    Full,
    High,
    Wireless,
    Super,
    SuperPlus,
}

impl Speed {
    pub fn from_wire(value: u32) -> Self {
        match value {
            1 => Speed::Low,
            2 => Speed::Full,
            3 => Speed::High,
            4 => Speed::Wireless,
            5 => Speed::Super,
            6 => Speed::SuperPlus,
            _ => Speed::Unknown,
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            Speed::Unknown => 0,
            Speed::Low => 1,
            Speed::Full => 2,
            Speed::High => 3,
            Speed::Wireless => 4,
            Speed::Super => 5,
            Speed::SuperPlus => 6,
        }
    }

    /// Whether this generation belongs on a USB2-class hub port, as
    /// opposed to a USB3-class one (§4.5, §6).
    pub fn is_usb2(self) -> bool {
        matches!(self, Speed::Low | Speed::Full | Speed::High | Speed::Wireless)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Connected,
    Importing,
    Enumerated,
    Plugged,
    Destroyed,
}

/// One imported remote USB device, end to end from TCP connect through
/// hub-port attachment.
pub struct VirtualDevice {
    pub bus_id: String,
    pub devid: u32,
    state: Mutex<SessionState>,
    speed: Mutex<Option<Speed>>,
    device_descriptor: Mutex<Option<DeviceDescriptor>>,
    config_descriptor: Mutex<Option<ConfigDescriptor>>,
    strings: Mutex<Strings>,
    pub registry: Registry,
}

impl VirtualDevice {
    pub fn new(bus_id: String, devid: u32) -> Self {
        VirtualDevice {
            bus_id,
            devid,
            state: Mutex::new(SessionState::Created),
            speed: Mutex::new(None),
            device_descriptor: Mutex::new(None),
            config_descriptor: Mutex::new(None),
            strings: Mutex::new(Strings::default()),
            registry: Registry::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    pub fn speed(&self) -> Option<Speed> {
        *self.speed.lock().unwrap()
    }

    pub fn device_descriptor(&self) -> Option<DeviceDescriptor> {
        *self.device_descriptor.lock().unwrap()
    }

    pub fn config_descriptor(&self) -> Option<ConfigDescriptor> {
        self.config_descriptor.lock().unwrap().clone()
    }

    pub fn strings(&self) -> Strings {
        self.strings.lock().unwrap().clone()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
    }

    /// `Created -> Connected`: the TCP connection to the remote usbip
    /// server succeeded.
    pub fn connect(&self) {
        self.set_state(SessionState::Connected);
    }

    /// `Connected -> Importing`: the client sent `OP_REQ_IMPORT` and is
    /// waiting on `OP_REP_IMPORT`.
    pub fn begin_import(&self) {
        self.set_state(SessionState::Importing);
    }

    /// Maps a wire-level handshake failure onto the session error
    /// taxonomy: a version mismatch in `op_common` is reported as
    /// `VersionMismatch` (§8 scenario 2) rather than a generic protocol
    /// error, so callers can distinguish "talked to an incompatible
    /// peer" from "the bytes were garbage".
    pub fn map_handshake_error(err: WireError) -> SessionError {
        match err {
            WireError::UnsupportedVersion(v) => SessionError::VersionMismatch(v),
            other => SessionError::Protocol(other),
        }
    }

    /// `Importing -> Importing` (validated): checks the reply's `bus_id`
    /// against the one requested and records the reported generation.
    /// Does not itself advance the state past `Importing`; descriptor
    /// fetch must still happen before the device is usable.
    pub fn import(&self, reply: &ImportReply) -> Result<(), SessionError> {
        if reply.bus_id != self.bus_id {
            return Err(SessionError::BusIdMismatch {
                expected: self.bus_id.clone(),
                got: reply.bus_id.clone(),
            });
        }
        *self.speed.lock().unwrap() = Some(Speed::from_wire(reply.speed));
        Ok(())
    }

    /// Validates the imported device's reported generation against what
    /// the caller asked for (the USB-generation-retry scenario in §8):
    /// callers that require e.g. USB3 retry against a different bus_id
    /// if this fails, rather than this session attempting a different
    /// bus_id itself.
    pub fn check_requested_generation(&self, want_usb2: bool) -> Result<(), SessionError> {
        let speed = self.speed().unwrap_or(Speed::Unknown);
        if speed.is_usb2() != want_usb2 {
            return Err(SessionError::UsbGenerationMismatch(speed));
        }
        Ok(())
    }

    /// `Importing -> Enumerated` (§4.5): drives the actual `GET_DESCRIPTOR`
    /// control-transfer sequence over `dispatcher` — device descriptor,
    /// then the configuration header followed by its full `wTotalLength`
    /// blob, then string descriptors for `{0, iManufacturer, iProduct,
    /// iSerialNumber, iConfiguration}` using the language ID reported by
    /// index 0 for every non-zero index — and cross-checks the device and
    /// configuration descriptors against the import reply's summary
    /// fields. A failing string read stops string enumeration but does
    /// not fail the import: only the device and configuration descriptor
    /// reads are load-bearing.
    ///
    /// Submitting control transfers requires the registry to accept URBs,
    /// so this plugs the device in early, the same way the real driver's
    /// `VHCI_ATTACH` ioctl marks a port usable before the USB core's own
    /// enumeration traffic (itself ordinary control URBs) starts flowing;
    /// `attach()` repeats the same call once `Enumerated` is reached.
    pub fn fetch_descriptors(&self, dispatcher: &mut Dispatcher, reply: &ImportReply) -> Result<(), SessionError> {
        self.registry.set_plugged(true);

        let device_bytes = Self::control_read(dispatcher, Urb::get_descriptor(DescriptorKind::Device as u8, 0, 0, DEVICE_DESCRIPTOR_LEN as u16))?;
        let device = DeviceDescriptor::parse(&device_bytes)?;
        if device.vendor != reply.id_vendor || device.product != reply.id_product {
            return Err(SessionError::DeviceDescriptorMismatch);
        }

        let header = Self::control_read(
            dispatcher,
            Urb::get_descriptor(DescriptorKind::Configuration as u8, 0, 0, CONFIG_DESCRIPTOR_HEADER_LEN as u16),
        )?;
        let total_length = u16::from_le_bytes([
            *header.get(2).unwrap_or(&0),
            *header.get(3).unwrap_or(&0),
        ]);
        let full = Self::control_read(dispatcher, Urb::get_descriptor(DescriptorKind::Configuration as u8, 0, 0, total_length))?;
        let config = ConfigDescriptor::parse(full)?;
        if config.num_interfaces() != reply.num_interfaces {
            return Err(SessionError::DeviceDescriptorMismatch);
        }

        let mut strings = Strings::default();
        if let Ok(lang_bytes) = Self::control_read(dispatcher, Urb::get_descriptor(DescriptorKind::String as u8, 0, 0, 255)) {
            if let Ok(ids) = descriptor::decode_language_ids(&lang_bytes) {
                strings.language_ids = ids;
            }
        }
        let lang_id = strings.language_ids.first().copied().unwrap_or(0);
        for index in [device.manufacturer_str, device.product_str, device.serial_str, config.i_configuration()] {
            if index == 0 {
                continue;
            }
            let bytes = match Self::control_read(dispatcher, Urb::get_descriptor(DescriptorKind::String as u8, index, lang_id, 255)) {
                Ok(bytes) => bytes,
                Err(_) => break,
            };
            match descriptor::decode_string_descriptor(&bytes) {
                Ok(text) => {
                    strings.by_index.insert(index, text);
                }
                Err(_) => break,
            }
        }

        *self.device_descriptor.lock().unwrap() = Some(device);
        *self.config_descriptor.lock().unwrap() = Some(config);
        *self.strings.lock().unwrap() = strings;
        self.set_state(SessionState::Enumerated);
        Ok(())
    }

    /// Submits one control-transfer URB, pumps the writer side until its
    /// frame is fully on the wire, reads exactly one reply frame, and
    /// returns the (already length-clamped, §4.3) payload — the
    /// synchronous request/reply pattern descriptor enumeration needs,
    /// built from the same `write_step`/`read_step` units the spawned
    /// reader/writer threads use once the session is fully up.
    fn control_read(dispatcher: &mut Dispatcher, urb: Urb) -> Result<Vec<u8>, SessionError> {
        let (_seqnum, rx) = dispatcher.submit(urb)?;
        let mut steps = 0;
        while dispatcher.registry().pending_write().is_some() || steps == 0 {
            dispatcher.write_step().map_err(SessionError::Network)?;
            steps += 1;
        }
        dispatcher.read_step().map_err(SessionError::Network)?;
        let completion = rx
            .recv()
            .map_err(|_| SessionError::Network(io::Error::new(io::ErrorKind::BrokenPipe, "completion channel closed")))?;
        if !completion.status.is_ok() {
            return Err(SessionError::Network(io::Error::new(
                io::ErrorKind::Other,
                format!("control transfer failed: {:?}", completion.status),
            )));
        }
        Ok(completion.data)
    }

    /// When the device descriptor's class triple is unset (`0x00`), the
    /// real class triple lives on interface 0 of the active configuration
    /// instead; this records that resolved value for class-based matching
    /// without mutating the cached device descriptor.
    pub fn set_class_subclass_proto(&self, class: u8, sub_class: u8, protocol: u8) {
        let mut guard = self.device_descriptor.lock().unwrap();
        if let Some(desc) = guard.as_mut() {
            desc.class = class;
            desc.sub_class = sub_class;
            desc.protocol = protocol;
        }
    }

    /// `Enumerated -> Plugged`: the device is attached to a hub port and
    /// can start accepting URBs.
    pub fn attach(&self) -> Result<(), SessionError> {
        if self.state() != SessionState::Enumerated {
            return Err(SessionError::DeviceDescriptorMismatch);
        }
        self.registry.set_plugged(true);
        self.set_state(SessionState::Plugged);
        Ok(())
    }

    /// `Plugged -> Destroyed` (idempotent, per §8's detach scenario):
    /// cancels every outstanding URB and marks the device gone. Calling
    /// this more than once is a no-op past the first call.
    pub fn disconnect(&self) {
        if self.state() == SessionState::Destroyed {
            return;
        }
        self.registry.destroy_all();
        *self.device_descriptor.lock().unwrap() = None;
        *self.config_descriptor.lock().unwrap() = None;
        *self.strings.lock().unwrap() = Strings::default();
        self.set_state(SessionState::Destroyed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::mock::SharedMockSocket;
    use crate::wire::{RetSubmit, DIR_IN};
    use std::sync::Arc;

    fn reply(bus_id: &str, speed: u32) -> ImportReply {
        ImportReply {
            path: "/sys/devices/usb1/1-1".into(),
            bus_id: bus_id.into(),
            busnum: 1,
            devnum: 2,
            speed,
            id_vendor: 0x1234,
            id_product: 0x5678,
            bcd_device: 0x0100,
            device_class: 0,
            device_sub_class: 0,
            device_protocol: 0,
            configuration_value: 1,
            num_configurations: 1,
            num_interfaces: 1,
        }
    }

    /// Raw bytes for a device descriptor with vendor/product matching
    /// [`reply`], and the given string indices (0 meaning "none").
    fn device_descriptor_bytes(manufacturer_str: u8, product_str: u8, serial_str: u8) -> Vec<u8> {
        vec![
            18, 1, // length, type
            0x00, 0x02, // bcdUSB 2.00
            0, 0, 0, // class, subclass, protocol
            64, // max packet size 0
            0x34, 0x12, // idVendor 0x1234
            0x78, 0x56, // idProduct 0x5678
            0x00, 0x01, // bcdDevice 0x0100
            manufacturer_str,
            product_str,
            serial_str,
            1, // bNumConfigurations
        ]
    }

    /// A 25-byte configuration: 9-byte header (bNumInterfaces=1,
    /// iConfiguration as given) + one interface + one bulk-IN endpoint.
    fn config_descriptor_bytes(i_configuration: u8) -> Vec<u8> {
        vec![
            9, 2, 25, 0, 1, 1, i_configuration, 0, 0, // configuration
            9, 4, 0, 0, 1, 0, 0, 0, 0, // interface
            7, 5, 0x81, 0x02, 0x00, 0x02, 0, // endpoint
        ]
    }

    fn ret_submit_ok(seqnum: u32, devid: u32, payload: &[u8]) -> Vec<u8> {
        let ret = RetSubmit::ok(seqnum, devid, DIR_IN, 0, payload.len() as u32);
        let mut frame = Vec::new();
        ret.write_to(&mut frame, payload, &[]).unwrap();
        frame
    }

    fn ret_submit_stalled(seqnum: u32, devid: u32) -> Vec<u8> {
        let mut ret = RetSubmit::ok(seqnum, devid, DIR_IN, 0, 0);
        ret.status = -32; // EPIPE, a stalled control endpoint
        let mut frame = Vec::new();
        ret.write_to(&mut frame, &[], &[]).unwrap();
        frame
    }

    #[test]
    fn happy_path_walks_every_state_in_order() {
        let devid = 0x1_0001;
        let dev = Arc::new(VirtualDevice::new("1-1".into(), devid));
        assert_eq!(dev.state(), SessionState::Created);
        dev.connect();
        assert_eq!(dev.state(), SessionState::Connected);
        dev.begin_import();
        dev.import(&reply("1-1", 3)).unwrap();
        assert_eq!(dev.speed(), Some(Speed::High));

        let shared = SharedMockSocket::default();
        let mut dispatcher = Dispatcher::new(dev.clone(), Box::new(shared.clone()));

        let config = config_descriptor_bytes(0);
        shared.push_inbound(&ret_submit_ok(2, devid, &device_descriptor_bytes(0, 0, 0)));
        shared.push_inbound(&ret_submit_ok(4, devid, &config[..CONFIG_DESCRIPTOR_HEADER_LEN]));
        shared.push_inbound(&ret_submit_ok(6, devid, &config));
        shared.push_inbound(&ret_submit_ok(8, devid, &[4, 3, 0x09, 0x04]));

        dev.fetch_descriptors(&mut dispatcher, &reply("1-1", 3)).unwrap();
        assert_eq!(dev.state(), SessionState::Enumerated);
        assert_eq!(dev.device_descriptor().unwrap().vendor, 0x1234);
        assert_eq!(dev.config_descriptor().unwrap().num_interfaces(), 1);
        assert_eq!(dev.strings().language_ids, vec![0x0409]);

        dev.attach().unwrap();
        assert_eq!(dev.state(), SessionState::Plugged);
        dev.disconnect();
        assert_eq!(dev.state(), SessionState::Destroyed);
        assert!(dev.device_descriptor().is_none());
    }

    #[test]
    fn fetch_descriptors_reads_strings_using_the_first_language_id() {
        let devid = 0x1_0001;
        let dev = Arc::new(VirtualDevice::new("1-1".into(), devid));
        dev.connect();
        dev.begin_import();
        dev.import(&reply("1-1", 3)).unwrap();

        let shared = SharedMockSocket::default();
        let mut dispatcher = Dispatcher::new(dev.clone(), Box::new(shared.clone()));

        let config = config_descriptor_bytes(0);
        shared.push_inbound(&ret_submit_ok(2, devid, &device_descriptor_bytes(3, 0, 0)));
        shared.push_inbound(&ret_submit_ok(4, devid, &config[..CONFIG_DESCRIPTOR_HEADER_LEN]));
        shared.push_inbound(&ret_submit_ok(6, devid, &config));
        shared.push_inbound(&ret_submit_ok(8, devid, &[4, 3, 0x09, 0x04]));
        let text: Vec<u8> = "acme".encode_utf16().flat_map(|c| c.to_le_bytes()).collect();
        let mut manufacturer = vec![2 + text.len() as u8, 3];
        manufacturer.extend(text);
        shared.push_inbound(&ret_submit_ok(10, devid, &manufacturer));

        dev.fetch_descriptors(&mut dispatcher, &reply("1-1", 3)).unwrap();
        assert_eq!(dev.strings().by_index.get(&3), Some(&"acme".to_string()));
    }

    #[test]
    fn fetch_descriptors_stops_string_enumeration_on_a_failing_read_without_failing_import() {
        let devid = 0x1_0001;
        let dev = Arc::new(VirtualDevice::new("1-1".into(), devid));
        dev.connect();
        dev.begin_import();
        dev.import(&reply("1-1", 3)).unwrap();

        let shared = SharedMockSocket::default();
        let mut dispatcher = Dispatcher::new(dev.clone(), Box::new(shared.clone()));

        let config = config_descriptor_bytes(0);
        shared.push_inbound(&ret_submit_ok(2, devid, &device_descriptor_bytes(3, 0, 0)));
        shared.push_inbound(&ret_submit_ok(4, devid, &config[..CONFIG_DESCRIPTOR_HEADER_LEN]));
        shared.push_inbound(&ret_submit_ok(6, devid, &config));
        shared.push_inbound(&ret_submit_ok(8, devid, &[4, 3, 0x09, 0x04]));
        shared.push_inbound(&ret_submit_stalled(10, devid));

        dev.fetch_descriptors(&mut dispatcher, &reply("1-1", 3)).unwrap();
        assert_eq!(dev.state(), SessionState::Enumerated);
        assert!(dev.strings().by_index.get(&3).is_none());
    }

    #[test]
    fn fetch_descriptors_fails_import_on_device_descriptor_mismatch() {
        let devid = 0x1_0001;
        let dev = Arc::new(VirtualDevice::new("1-1".into(), devid));
        dev.connect();
        dev.begin_import();
        dev.import(&reply("1-1", 3)).unwrap();

        let shared = SharedMockSocket::default();
        let mut dispatcher = Dispatcher::new(dev.clone(), Box::new(shared.clone()));

        let mut mismatched = device_descriptor_bytes(0, 0, 0);
        mismatched[8] = 0xFF; // wrong idVendor
        shared.push_inbound(&ret_submit_ok(2, devid, &mismatched));

        let err = dev.fetch_descriptors(&mut dispatcher, &reply("1-1", 3)).unwrap_err();
        assert!(matches!(err, SessionError::DeviceDescriptorMismatch));
    }

    #[test]
    fn import_rejects_mismatched_bus_id() {
        let dev = VirtualDevice::new("1-1".into(), 1);
        let err = dev.import(&reply("1-2", 3)).unwrap_err();
        assert!(matches!(err, SessionError::BusIdMismatch { .. }));
    }

    #[test]
    fn generation_mismatch_is_reported_for_retry_by_the_caller() {
        let dev = VirtualDevice::new("1-1".into(), 1);
        dev.import(&reply("1-1", 5)).unwrap(); // Super
        assert!(dev.check_requested_generation(true).is_err());
        assert!(dev.check_requested_generation(false).is_ok());
    }

    #[test]
    fn disconnect_is_idempotent() {
        let dev = VirtualDevice::new("1-1".into(), 1);
        dev.connect();
        dev.disconnect();
        dev.disconnect();
        assert_eq!(dev.state(), SessionState::Destroyed);
    }

    #[test]
    fn attach_requires_enumerated_state() {
        let dev = VirtualDevice::new("1-1".into(), 1);
        assert!(dev.attach().is_err());
    }
}
