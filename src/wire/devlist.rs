//! `OP_REQ_DEVLIST` / `OP_REP_DEVLIST` (supplement, §4.2.1).
//!
//! Named and encodable so a future control-plane front-end has a complete
//! codec to build on; no session transition in this crate depends on it.

use super::op_common::ImportReply;
use super::{read_exact_or, read_u32, write_all_or, write_u32};
use crate::error::WireError;
use std::io::{Read, Write};

/// One exported device entry plus its interface class/subclass/protocol
/// summaries, as carried in an `op_devlist_reply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedDevice {
    pub udev: ImportReply,
    /// `(class, sub_class, protocol)` per interface, in interface order.
    pub interfaces: Vec<(u8, u8, u8)>,
}

impl ExportedDevice {
    pub fn write_to(&self, w: &mut impl Write) -> Result<(), WireError> {
        self.udev.write_to(w)?;
        for &(class, sub_class, protocol) in &self.interfaces {
            write_all_or(w, &[class, sub_class, protocol, 0])?;
        }
        Ok(())
    }

    pub fn read_from(r: &mut impl Read) -> Result<Self, WireError> {
        let udev = ImportReply::read_from(r)?;
        let mut interfaces = Vec::with_capacity(udev.num_interfaces as usize);
        for _ in 0..udev.num_interfaces {
            let mut buf = [0u8; 4];
            read_exact_or(r, &mut buf)?;
            interfaces.push((buf[0], buf[1], buf[2]));
        }
        Ok(ExportedDevice { udev, interfaces })
    }
}

/// `op_devlist_reply`: the full list of devices a server currently exports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevlistReply {
    pub devices: Vec<ExportedDevice>,
}

impl DevlistReply {
    pub fn write_to(&self, w: &mut impl Write) -> Result<(), WireError> {
        write_u32(w, self.devices.len() as u32)?;
        for device in &self.devices {
            device.write_to(w)?;
        }
        Ok(())
    }

    pub fn read_from(r: &mut impl Read) -> Result<Self, WireError> {
        let count = read_u32(r)?;
        let mut devices = Vec::with_capacity(count as usize);
        for _ in 0..count {
            devices.push(ExportedDevice::read_from(r)?);
        }
        Ok(DevlistReply { devices })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_udev() -> ImportReply {
        ImportReply {
            path: "/sys/bus/1-1".into(),
            bus_id: "1-1".into(),
            busnum: 1,
            devnum: 1,
            speed: 3,
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

    #[test]
    fn devlist_round_trips_with_interfaces() {
        let reply = DevlistReply {
            devices: vec![ExportedDevice {
                udev: sample_udev(),
                interfaces: vec![(8, 6, 80)],
            }],
        };
        let mut buf = Vec::new();
        reply.write_to(&mut buf).unwrap();
        let decoded = DevlistReply::read_from(&mut &buf[..]).unwrap();
        assert_eq!(decoded, reply);
    }

    #[test]
    fn empty_devlist_round_trips() {
        let reply = DevlistReply { devices: vec![] };
        let mut buf = Vec::new();
        reply.write_to(&mut buf).unwrap();
        let decoded = DevlistReply::read_from(&mut &buf[..]).unwrap();
        assert!(decoded.devices.is_empty());
    }
}
