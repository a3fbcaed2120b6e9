use super::{read_exact_or, read_u16, read_u32, write_all_or, write_u16, write_u32, USBIP_VERSION};
use crate::error::WireError;
use std::io::{Read, Write};

/// USB/IP control-plane opcodes. `REQ_*` values have the top bit set
/// (`0x8000`) per the wire protocol; `REP_*` values share the low bits
/// with their request but without the top bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    ReqDevlist,
    RepDevlist,
    ReqImport,
    RepImport,
}

impl OpCode {
    pub fn wire_value(self) -> u16 {
        match self {
            OpCode::ReqImport => 0x8003,
            OpCode::RepImport => 0x0003,
            OpCode::ReqDevlist => 0x8005,
            OpCode::RepDevlist => 0x0005,
        }
    }

    pub fn from_wire(value: u16) -> Result<Self, WireError> {
        match value {
            0x8003 => Ok(OpCode::ReqImport),
            0x0003 => Ok(OpCode::RepImport),
            0x8005 => Ok(OpCode::ReqDevlist),
            0x0005 => Ok(OpCode::RepDevlist),
            other => Err(WireError::UnknownOpcode(other)),
        }
    }
}

/// The `op_common` preamble shared by every control-plane packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpCommon {
    pub version: u16,
    pub code: OpCode,
    pub status: u32,
}

impl OpCommon {
    pub fn new(code: OpCode, status: u32) -> Self {
        OpCommon {
            version: USBIP_VERSION,
            code,
            status,
        }
    }

    pub fn read_from(r: &mut impl Read) -> Result<Self, WireError> {
        let version = read_u16(r)?;
        let code_raw = read_u16(r)?;
        let status = read_u32(r)?;
        if version != USBIP_VERSION {
            return Err(WireError::UnsupportedVersion(version));
        }
        Ok(OpCommon {
            version,
            code: OpCode::from_wire(code_raw)?,
            status,
        })
    }

    pub fn write_to(&self, w: &mut impl Write) -> Result<(), WireError> {
        write_u16(w, self.version)?;
        write_u16(w, self.code.wire_value())?;
        write_u32(w, self.status)
    }
}

const BUS_ID_LEN: usize = 32;

/// `op_import_request`: the client's half of the import handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest {
    pub bus_id: String,
}

impl ImportRequest {
    pub fn new(bus_id: &str) -> Result<Self, WireError> {
        if !bus_id.is_ascii() || bus_id.len() > BUS_ID_LEN - 1 {
            return Err(WireError::InvalidBusId(bus_id.to_owned()));
        }
        Ok(ImportRequest {
            bus_id: bus_id.to_owned(),
        })
    }

    pub fn write_to(&self, w: &mut impl Write) -> Result<(), WireError> {
        let mut buf = [0u8; BUS_ID_LEN];
        buf[..self.bus_id.len()].copy_from_slice(self.bus_id.as_bytes());
        write_all_or(w, &buf)
    }

    pub fn read_from(r: &mut impl Read) -> Result<Self, WireError> {
        let mut buf = [0u8; BUS_ID_LEN];
        read_exact_or(r, &mut buf)?;
        Ok(ImportRequest {
            bus_id: bus_id_from_bytes(&buf),
        })
    }
}

pub(crate) fn bus_id_from_bytes(buf: &[u8; BUS_ID_LEN]) -> String {
    let nul = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..nul]).into_owned()
}

/// `udev` as carried in `op_import_reply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReply {
    pub path: String,
    pub bus_id: String,
    pub busnum: u32,
    pub devnum: u32,
    pub speed: u32,
    pub id_vendor: u16,
    pub id_product: u16,
    pub bcd_device: u16,
    pub device_class: u8,
    pub device_sub_class: u8,
    pub device_protocol: u8,
    pub configuration_value: u8,
    pub num_configurations: u8,
    pub num_interfaces: u8,
}

const PATH_LEN: usize = 256;

impl ImportReply {
    pub fn write_to(&self, w: &mut impl Write) -> Result<(), WireError> {
        let mut path_buf = [0u8; PATH_LEN];
        let path_bytes = self.path.as_bytes();
        let n = path_bytes.len().min(PATH_LEN - 1);
        path_buf[..n].copy_from_slice(&path_bytes[..n]);
        write_all_or(w, &path_buf)?;

        let mut bus_id_buf = [0u8; BUS_ID_LEN];
        let bus_id_bytes = self.bus_id.as_bytes();
        let n = bus_id_bytes.len().min(BUS_ID_LEN - 1);
        bus_id_buf[..n].copy_from_slice(&bus_id_bytes[..n]);
        write_all_or(w, &bus_id_buf)?;

        write_u32(w, self.busnum)?;
        write_u32(w, self.devnum)?;
        write_u32(w, self.speed)?;
        write_u16(w, self.id_vendor)?;
        write_u16(w, self.id_product)?;
        write_u16(w, self.bcd_device)?;
        write_all_or(
            w,
            &[
                self.device_class,
                self.device_sub_class,
                self.device_protocol,
                self.configuration_value,
                self.num_configurations,
                self.num_interfaces,
            ],
        )
    }

    pub fn read_from(r: &mut impl Read) -> Result<Self, WireError> {
        let mut path_buf = [0u8; PATH_LEN];
        read_exact_or(r, &mut path_buf)?;
        let nul = path_buf.iter().position(|&b| b == 0).unwrap_or(PATH_LEN);
        let path = String::from_utf8_lossy(&path_buf[..nul]).into_owned();

        let mut bus_id_buf = [0u8; BUS_ID_LEN];
        read_exact_or(r, &mut bus_id_buf)?;
        let bus_id = bus_id_from_bytes(&bus_id_buf);

        let busnum = read_u32(r)?;
        let devnum = read_u32(r)?;
        let speed = read_u32(r)?;
        let id_vendor = read_u16(r)?;
        let id_product = read_u16(r)?;
        let bcd_device = read_u16(r)?;

        let mut tail = [0u8; 6];
        read_exact_or(r, &mut tail)?;

        Ok(ImportReply {
            path,
            bus_id,
            busnum,
            devnum,
            speed,
            id_vendor,
            id_product,
            bcd_device,
            device_class: tail[0],
            device_sub_class: tail[1],
            device_protocol: tail[2],
            configuration_value: tail[3],
            num_configurations: tail[4],
            num_interfaces: tail[5],
        })
    }
}
