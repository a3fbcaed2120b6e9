use super::{read_exact_or, read_u32, write_all_or, write_u32};
use crate::error::WireError;
use std::io::{Read, Write};

pub const CMD_UNLINK: u32 = 0x0000_0002;
pub const RET_UNLINK: u32 = 0x0000_0004;

/// Shared 48-byte header size with `cmd_submit`/`ret_submit`: the common
/// `command/seqnum/devid/direction/ep` prefix, one 4-byte field specific
/// to unlink, and reserved padding out to the common frame size.
const HEADER_LEN: usize = 48;
const PADDING_LEN: usize = HEADER_LEN - (5 * 4) - 4;

/// `cmd_unlink`: requests cancellation of an outstanding `cmd_submit`
/// identified by `unlink_seqnum`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdUnlink {
    pub seqnum: u32,
    pub devid: u32,
    pub direction: u32,
    pub ep: u32,
    pub unlink_seqnum: u32,
}

impl CmdUnlink {
    pub fn write_to(&self, w: &mut impl Write) -> Result<(), WireError> {
        write_u32(w, CMD_UNLINK)?;
        write_u32(w, self.seqnum)?;
        write_u32(w, self.devid)?;
        write_u32(w, self.direction)?;
        write_u32(w, self.ep)?;
        write_u32(w, self.unlink_seqnum)?;
        write_all_or(w, &[0u8; PADDING_LEN])
    }

    pub fn read_from(r: &mut impl Read) -> Result<Self, WireError> {
        let command = read_u32(r)?;
        if command != CMD_UNLINK {
            return Err(WireError::UnknownOpcode(command as u16));
        }
        let seqnum = read_u32(r)?;
        let devid = read_u32(r)?;
        let direction = read_u32(r)?;
        let ep = read_u32(r)?;
        let unlink_seqnum = read_u32(r)?;
        let mut padding = [0u8; PADDING_LEN];
        read_exact_or(r, &mut padding)?;
        Ok(CmdUnlink {
            seqnum,
            devid,
            direction,
            ep,
            unlink_seqnum,
        })
    }
}

/// `ret_unlink`: the server's acknowledgement of a `cmd_unlink`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetUnlink {
    pub seqnum: u32,
    pub devid: u32,
    pub direction: u32,
    pub ep: u32,
    pub status: i32,
}

impl RetUnlink {
    pub fn write_to(&self, w: &mut impl Write) -> Result<(), WireError> {
        write_u32(w, RET_UNLINK)?;
        write_u32(w, self.seqnum)?;
        write_u32(w, self.devid)?;
        write_u32(w, self.direction)?;
        write_u32(w, self.ep)?;
        write_u32(w, self.status as u32)?;
        write_all_or(w, &[0u8; PADDING_LEN])
    }

    pub fn read_from(r: &mut impl Read) -> Result<Self, WireError> {
        let command = read_u32(r)?;
        if command != RET_UNLINK {
            return Err(WireError::UnknownOpcode(command as u16));
        }
        let seqnum = read_u32(r)?;
        let devid = read_u32(r)?;
        let direction = read_u32(r)?;
        let ep = read_u32(r)?;
        let status = read_u32(r)? as i32;
        let mut padding = [0u8; PADDING_LEN];
        read_exact_or(r, &mut padding)?;
        Ok(RetUnlink {
            seqnum,
            devid,
            direction,
            ep,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmd_unlink_round_trips_and_is_48_bytes() {
        let cmd = CmdUnlink {
            seqnum: 9,
            devid: 1,
            direction: 0,
            ep: 0,
            unlink_seqnum: 3,
        };
        let mut buf = Vec::new();
        cmd.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_LEN);
        assert_eq!(CmdUnlink::read_from(&mut &buf[..]).unwrap(), cmd);
    }

    #[test]
    fn ret_unlink_round_trips() {
        let ret = RetUnlink {
            seqnum: 9,
            devid: 1,
            direction: 0,
            ep: 0,
            status: -2,
        };
        let mut buf = Vec::new();
        ret.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_LEN);
        assert_eq!(RetUnlink::read_from(&mut &buf[..]).unwrap(), ret);
    }
}
