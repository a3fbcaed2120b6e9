//! USB descriptor parser (C1).
//!
//! Grounded on the teacher's `usb::DescriptorKind` enumeration and its
//! plain `#[repr(packed)]` descriptor structs (`usb/device.rs`,
//! `usb/endpoint.rs`, `usb/hub.rs`): descriptor kinds are data, not a
//! hardcoded switch, so `find_next` stays a single generic scan and the
//! catalogue in §4.1.1 is "just more variants" rather than new code paths.

use crate::error::DescriptorError;

/// The full USB/BOS descriptor type catalogue (§4.1.1); only a subset is
/// produced by this crate's own encoders, but `find_next` recognizes all
/// of them so a configuration blob from a real device parses cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DescriptorKind {
    Device = 1,
    Configuration = 2,
    String = 3,
    Interface = 4,
    Endpoint = 5,
    DeviceQualifier = 6,
    OtherSpeedConfiguration = 7,
    InterfacePower = 8,
    OnTheGo = 9,
    BinaryObjectStorage = 15,
    Hid = 33,
    Hub = 41,
    SuperSpeedCompanion = 48,
}

impl DescriptorKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        use DescriptorKind::*;
        Some(match byte {
            1 => Device,
            2 => Configuration,
            3 => String,
            4 => Interface,
            5 => Endpoint,
            6 => DeviceQualifier,
            7 => OtherSpeedConfiguration,
            8 => InterfacePower,
            9 => OnTheGo,
            15 => BinaryObjectStorage,
            33 => Hid,
            41 => Hub,
            48 => SuperSpeedCompanion,
            _ => return None,
        })
    }
}

/// An 18-byte USB device descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub usb: u16,
    pub class: u8,
    pub sub_class: u8,
    pub protocol: u8,
    pub max_packet_size0: u8,
    pub vendor: u16,
    pub product: u16,
    pub release: u16,
    pub manufacturer_str: u8,
    pub product_str: u8,
    pub serial_str: u8,
    pub num_configurations: u8,
}

pub const DEVICE_DESCRIPTOR_LEN: usize = 18;

impl DeviceDescriptor {
    pub fn parse(bytes: &[u8]) -> Result<Self, DescriptorError> {
        if bytes.len() < DEVICE_DESCRIPTOR_LEN || bytes[0] as usize != DEVICE_DESCRIPTOR_LEN || bytes[1] != DescriptorKind::Device as u8 {
            return Err(DescriptorError::MalformedDevice {
                length: bytes.first().copied().unwrap_or(0),
                kind: bytes.get(1).copied().unwrap_or(0),
            });
        }
        Ok(DeviceDescriptor {
            length: bytes[0],
            descriptor_type: bytes[1],
            usb: u16::from_le_bytes([bytes[2], bytes[3]]),
            class: bytes[4],
            sub_class: bytes[5],
            protocol: bytes[6],
            max_packet_size0: bytes[7],
            vendor: u16::from_le_bytes([bytes[8], bytes[9]]),
            product: u16::from_le_bytes([bytes[10], bytes[11]]),
            release: u16::from_le_bytes([bytes[12], bytes[13]]),
            manufacturer_str: bytes[14],
            product_str: bytes[15],
            serial_str: bytes[16],
            num_configurations: bytes[17],
        })
    }

    pub fn is_class_unset(&self) -> bool {
        self.class == 0 && self.sub_class == 0 && self.protocol == 0
    }
}

/// A 9-byte USB configuration descriptor header; `raw` retains the whole
/// `wTotalLength`-sized blob so [`find_next`] can keep scanning past it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDescriptor {
    pub raw: Vec<u8>,
}

pub const CONFIG_DESCRIPTOR_HEADER_LEN: usize = 9;

impl ConfigDescriptor {
    pub fn parse(raw: Vec<u8>) -> Result<Self, DescriptorError> {
        if raw.len() < CONFIG_DESCRIPTOR_HEADER_LEN
            || raw[0] as usize != CONFIG_DESCRIPTOR_HEADER_LEN
            || raw[1] != DescriptorKind::Configuration as u8
        {
            return Err(DescriptorError::MalformedConfig {
                length: raw.first().copied().unwrap_or(0),
                kind: raw.get(1).copied().unwrap_or(0),
                total_length: Self::total_length_of(&raw),
            });
        }
        let total_length = Self::total_length_of(&raw);
        if total_length <= raw[0] as u16 {
            return Err(DescriptorError::MalformedConfig {
                length: raw[0],
                kind: raw[1],
                total_length,
            });
        }
        Ok(ConfigDescriptor { raw })
    }

    fn total_length_of(raw: &[u8]) -> u16 {
        if raw.len() >= 4 {
            u16::from_le_bytes([raw[2], raw[3]])
        } else {
            0
        }
    }

    pub fn total_length(&self) -> u16 {
        Self::total_length_of(&self.raw)
    }

    pub fn b_length(&self) -> u8 {
        self.raw[0]
    }

    pub fn configuration_value(&self) -> u8 {
        self.raw[5]
    }

    pub fn num_interfaces(&self) -> u8 {
        self.raw[4]
    }

    /// `iConfiguration`: the string descriptor index describing this
    /// configuration, or 0 if the device doesn't supply one.
    pub fn i_configuration(&self) -> u8 {
        self.raw[6]
    }

    /// Starting just past `from` (or at offset 0 if `from` is `None`),
    /// scans forward through `wTotalLength` bytes for the first descriptor
    /// of the given kind. A `bLength` of 0 or 1 that would make no
    /// progress (or a step that would run past `wTotalLength`) terminates
    /// the scan — this is what guarantees termination on malformed input
    /// instead of looping forever.
    pub fn find_next(&self, from: Option<usize>, kind: DescriptorKind) -> Option<(usize, &[u8])> {
        let total = self.total_length() as usize;
        let mut offset = match from {
            Some(prev_offset) => {
                let prev_len = *self.raw.get(prev_offset)? as usize;
                if prev_len < 2 {
                    return None;
                }
                prev_offset + prev_len
            }
            None => 0,
        };

        while offset + 2 <= total && offset + 2 <= self.raw.len() {
            let len = self.raw[offset] as usize;
            if len < 2 || offset + len > total {
                return None;
            }
            let descriptor_type = self.raw[offset + 1];
            if descriptor_type == kind as u8 {
                return Some((offset, &self.raw[offset..offset + len]));
            }
            offset += len;
        }
        None
    }

    /// All sub-descriptor slices in the configuration, in wire order, used
    /// by the parser-totality test (§8): summing their lengths must equal
    /// `wTotalLength`.
    pub fn iter_all(&self) -> impl Iterator<Item = &[u8]> + '_ {
        AllDescriptors {
            raw: &self.raw,
            total: self.total_length() as usize,
            offset: 0,
        }
    }

    /// Returns the first interface descriptor matching `intf_num` and
    /// `alt_setting`; `-1` (represented as `None`) is a wildcard for
    /// either field.
    pub fn find_interface(
        &self,
        intf_num: Option<u8>,
        alt_setting: Option<u8>,
    ) -> Option<InterfaceDescriptor> {
        let mut from = None;
        loop {
            let (offset, bytes) = self.find_next(from, DescriptorKind::Interface)?;
            let iface = InterfaceDescriptor::parse(bytes).ok()?;
            let matches_num = intf_num.map_or(true, |n| n == iface.interface_number);
            let matches_alt = alt_setting.map_or(true, |a| a == iface.alternate_setting);
            if matches_num && matches_alt {
                return Some(iface);
            }
            from = Some(offset);
        }
    }

    /// Count of interface descriptors carrying the given interface number
    /// (i.e. the number of alternate settings it has).
    pub fn num_alt_settings(&self, intf_num: u8) -> usize {
        let mut count = 0;
        let mut from = None;
        loop {
            match self.find_next(from, DescriptorKind::Interface) {
                Some((offset, bytes)) => {
                    if let Ok(iface) = InterfaceDescriptor::parse(bytes) {
                        if iface.interface_number == intf_num {
                            count += 1;
                        }
                    }
                    from = Some(offset);
                }
                None => return count,
            }
        }
    }

    /// Yields the `bNumEndpoints` endpoint descriptors that immediately
    /// follow `interface`'s own descriptor bytes, tolerating interleaved
    /// vendor-specific descriptors (class-specific descriptors between the
    /// interface header and its endpoints are simply skipped over, since
    /// the scan is type-driven).
    pub fn endpoints_of(
        &self,
        interface_offset: usize,
        expected: u8,
    ) -> Result<Vec<EndpointDescriptor>, DescriptorError> {
        let mut endpoints = Vec::with_capacity(expected as usize);
        let mut from = Some(interface_offset);
        while endpoints.len() < expected as usize {
            match self.find_next(from, DescriptorKind::Endpoint) {
                Some((offset, bytes)) => {
                    // Stop if we've walked into the next interface's block.
                    if let Some((next_iface_off, _)) =
                        self.find_next(Some(interface_offset), DescriptorKind::Interface)
                    {
                        if next_iface_off != interface_offset && offset > next_iface_off {
                            break;
                        }
                    }
                    endpoints.push(EndpointDescriptor::parse(bytes)?);
                    from = Some(offset);
                }
                None => break,
            }
        }
        if endpoints.len() < expected as usize {
            return Err(DescriptorError::MissingEndpoints {
                interface: self.raw[interface_offset + 2],
                expected,
            });
        }
        Ok(endpoints)
    }
}

struct AllDescriptors<'a> {
    raw: &'a [u8],
    total: usize,
    offset: usize,
}

impl<'a> Iterator for AllDescriptors<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset + 2 > self.total {
            return None;
        }
        let len = *self.raw.get(self.offset)? as usize;
        if len < 2 || self.offset + len > self.total {
            return None;
        }
        let slice = &self.raw[self.offset..self.offset + len];
        self.offset += len;
        Some(slice)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub class: u8,
    pub sub_class: u8,
    pub protocol: u8,
    pub interface_str: u8,
}

impl InterfaceDescriptor {
    pub fn parse(bytes: &[u8]) -> Result<Self, DescriptorError> {
        if bytes.len() < 9 || bytes[1] != DescriptorKind::Interface as u8 {
            return Err(DescriptorError::MalformedConfig {
                length: bytes.first().copied().unwrap_or(0),
                kind: bytes.get(1).copied().unwrap_or(0),
                total_length: 0,
            });
        }
        Ok(InterfaceDescriptor {
            interface_number: bytes[2],
            alternate_setting: bytes[3],
            num_endpoints: bytes[4],
            class: bytes[5],
            sub_class: bytes[6],
            protocol: bytes[7],
            interface_str: bytes[8],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub endpoint_address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl EndpointDescriptor {
    pub fn parse(bytes: &[u8]) -> Result<Self, DescriptorError> {
        if bytes.len() < 7 || bytes[1] != DescriptorKind::Endpoint as u8 {
            return Err(DescriptorError::MalformedConfig {
                length: bytes.first().copied().unwrap_or(0),
                kind: bytes.get(1).copied().unwrap_or(0),
                total_length: 0,
            });
        }
        Ok(EndpointDescriptor {
            endpoint_address: bytes[2],
            attributes: bytes[3],
            max_packet_size: u16::from_le_bytes([bytes[4], bytes[5]]),
            interval: bytes[6],
        })
    }

    pub fn is_in(&self) -> bool {
        self.endpoint_address & 0x80 != 0
    }

    pub fn pipe_type(&self) -> PipeType {
        match self.attributes & 0x3 {
            0 => PipeType::Control,
            1 => PipeType::Isochronous,
            2 => PipeType::Bulk,
            3 => PipeType::Interrupt,
            _ => unreachable!("attributes & 0x3 is at most 3"),
        }
    }
}

/// Validates a string descriptor header (`bLength >= 2 && bDescriptorType
/// == 3`); the empty string (`bLength == 2`, no UTF-16 payload) is valid.
pub fn validate_string_descriptor(bytes: &[u8]) -> Result<(), DescriptorError> {
    if bytes.len() < 2 || bytes[0] as usize > bytes.len() || bytes[1] != DescriptorKind::String as u8 {
        return Err(DescriptorError::MalformedString(bytes.first().copied().unwrap_or(0)));
    }
    Ok(())
}

/// Decodes a string descriptor's UTF-16LE payload (everything after the
/// 2-byte header) into a `String`, null-terminating implicitly by simply
/// not including any embedded NUL beyond what UTF-16 decoding yields.
pub fn decode_string_descriptor(bytes: &[u8]) -> Result<String, DescriptorError> {
    validate_string_descriptor(bytes)?;
    let payload = &bytes[2..bytes[0] as usize];
    let utf16: Vec<u16> = payload
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok(String::from_utf16_lossy(&utf16))
}

/// The language-ID list carried in string descriptor index 0.
pub fn decode_language_ids(bytes: &[u8]) -> Result<Vec<u16>, DescriptorError> {
    validate_string_descriptor(bytes)?;
    let payload = &bytes[2..bytes[0] as usize];
    Ok(payload
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

const MSFT_SIGNATURE: &str = "MSFT100";

/// A Microsoft OS string descriptor is header-valid **and** its 7-char
/// signature equals the literal `"MSFT100"` (stored as 16-bit chars).
pub fn is_ms_os_string_descriptor(bytes: &[u8]) -> bool {
    if validate_string_descriptor(bytes).is_err() {
        return false;
    }
    match decode_string_descriptor(&bytes[..bytes.len().min(bytes[0] as usize)]) {
        Ok(text) => text.starts_with(MSFT_SIGNATURE),
        Err(_) => false,
    }
}
