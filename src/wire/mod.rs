//! USB/IP wire codec (C2).
//!
//! Every integer on the wire is big-endian. The three packet families
//! (`op_common`, `cmd_submit`/`ret_submit`, `cmd_unlink`/`ret_unlink`) are
//! each given a plain struct with explicit `read_from`/`write_to` methods
//! over `std::io::{Read, Write}`, rather than a `#[repr(packed)]` cast:
//! the wire representation is big-endian and the host is not necessarily
//! big-endian, so a byte-for-byte cast (as the teacher driver uses for its
//! little-endian MMIO registers) would be wrong here.

mod devlist;
mod op_common;
mod submit;
mod unlink;

pub use devlist::{DevlistReply, ExportedDevice};
pub use op_common::{OpCommon, OpCode, ImportReply, ImportRequest};
pub use submit::{CmdSubmit, IsoPacketDescriptor, RetSubmit, RET_SUBMIT};
pub use unlink::{CmdUnlink, RetUnlink};

use crate::error::WireError;
use std::io::{Read, Write};

/// USB/IP protocol version encoded in every `op_common` header.
pub const USBIP_VERSION: u16 = 0x0111;

/// Default TCP service name for usbip traffic; `3240` is the IANA-assigned
/// numeric fallback used when the service name does not resolve.
pub const USBIP_SERVICE_NAME: &str = "usbip";
pub const USBIP_DEFAULT_PORT: u16 = 3240;

pub const DIR_OUT: u32 = 0;
pub const DIR_IN: u32 = 1;

/// Fixed-size byte buffer helpers shared by every packet type.
pub(crate) fn read_exact_or(r: &mut impl Read, buf: &mut [u8]) -> Result<(), WireError> {
    r.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            WireError::ShortRead {
                expected: buf.len(),
                got: 0,
            }
        } else {
            WireError::Io(e)
        }
    })
}

pub(crate) fn write_all_or(w: &mut impl Write, buf: &[u8]) -> Result<(), WireError> {
    w.write_all(buf).map_err(WireError::Io)
}

pub(crate) fn read_u16(r: &mut impl Read) -> Result<u16, WireError> {
    let mut buf = [0u8; 2];
    read_exact_or(r, &mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

pub(crate) fn read_u32(r: &mut impl Read) -> Result<u32, WireError> {
    let mut buf = [0u8; 4];
    read_exact_or(r, &mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

pub(crate) fn write_u16(w: &mut impl Write, value: u16) -> Result<(), WireError> {
    write_all_or(w, &value.to_be_bytes())
}

pub(crate) fn write_u32(w: &mut impl Write, value: u32) -> Result<(), WireError> {
    write_all_or(w, &value.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u16_round_trips_through_network_order() {
        let mut buf = Vec::new();
        write_u16(&mut buf, 0x0111).unwrap();
        assert_eq!(buf, [0x01, 0x11]);
        assert_eq!(read_u16(&mut &buf[..]).unwrap(), 0x0111);
    }

    #[test]
    fn u32_round_trips_through_network_order() {
        let mut buf = Vec::new();
        write_u32(&mut buf, 0xDEAD_BEEF).unwrap();
        assert_eq!(buf, [0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(read_u32(&mut &buf[..]).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn short_read_is_reported_precisely() {
        let mut buf = [0u8; 4];
        let err = read_exact_or(&mut &[0u8, 1][..], &mut buf).unwrap_err();
        assert!(matches!(err, WireError::ShortRead { expected: 4, .. }));
    }
}
