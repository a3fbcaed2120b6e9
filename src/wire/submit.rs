use super::{read_exact_or, read_u32, write_all_or, write_u32, DIR_IN, DIR_OUT};
use crate::error::WireError;
use std::io::{Read, Write};

pub const CMD_SUBMIT: u32 = 0x0000_0001;
pub const RET_SUBMIT: u32 = 0x0000_0003;

const SETUP_LEN: usize = 8;
/// `command + seqnum + devid + direction + ep + flags + transfer_buffer_length
/// + start_frame + number_of_packets + interval + setup[8]`.
const HEADER_LEN: usize = 4 * 10 + SETUP_LEN;

/// `cmd_submit`: one URB submission on the wire. `setup` is the raw 8-byte
/// USB SETUP packet and is carried verbatim — it is **not** byteswapped,
/// since it is itself already defined field-by-field in USB byte order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdSubmit {
    pub seqnum: u32,
    pub devid: u32,
    pub direction: u32,
    pub ep: u32,
    pub flags: u32,
    pub transfer_buffer_length: u32,
    pub start_frame: u32,
    pub number_of_packets: u32,
    pub interval: u32,
    pub setup: [u8; SETUP_LEN],
}

impl CmdSubmit {
    pub fn is_in(&self) -> bool {
        self.direction == DIR_IN
    }

    /// Writes the 48-byte header followed by the OUT payload (if any) and
    /// the iso packet descriptor array (if any), per the frame layout in
    /// §4.2: `[header][out-payload][iso_descriptors]`.
    pub fn write_to(
        &self,
        w: &mut impl Write,
        out_payload: &[u8],
        iso_descriptors: &[IsoPacketDescriptor],
    ) -> Result<(), WireError> {
        write_u32(w, CMD_SUBMIT)?;
        write_u32(w, self.seqnum)?;
        write_u32(w, self.devid)?;
        write_u32(w, self.direction)?;
        write_u32(w, self.ep)?;
        write_u32(w, self.flags)?;
        write_u32(w, self.transfer_buffer_length)?;
        write_u32(w, self.start_frame)?;
        write_u32(w, self.number_of_packets)?;
        write_u32(w, self.interval)?;
        write_all_or(w, &self.setup)?;

        if self.direction == DIR_OUT && !out_payload.is_empty() {
            write_all_or(w, out_payload)?;
        }
        for desc in iso_descriptors {
            desc.write_to(w)?;
        }
        Ok(())
    }

    /// Reads the header only; the caller is responsible for then reading
    /// `transfer_buffer_length` bytes of OUT payload (if `direction ==
    /// OUT`) and `number_of_packets` iso descriptors, exactly mirroring
    /// `write_to`.
    pub fn read_header_from(r: &mut impl Read) -> Result<Self, WireError> {
        let command = read_u32(r)?;
        if command != CMD_SUBMIT {
            return Err(WireError::UnknownOpcode(command as u16));
        }
        read_body(r)
    }
}

fn read_body(r: &mut impl Read) -> Result<CmdSubmit, WireError> {
    let seqnum = read_u32(r)?;
    let devid = read_u32(r)?;
    let direction = read_u32(r)?;
    let ep = read_u32(r)?;
    let flags = read_u32(r)?;
    let transfer_buffer_length = read_u32(r)?;
    let start_frame = read_u32(r)?;
    let number_of_packets = read_u32(r)?;
    let interval = read_u32(r)?;
    let mut setup = [0u8; SETUP_LEN];
    read_exact_or(r, &mut setup)?;
    Ok(CmdSubmit {
        seqnum,
        devid,
        direction,
        ep,
        flags,
        transfer_buffer_length,
        start_frame,
        number_of_packets,
        interval,
        setup,
    })
}

/// `ret_submit`: the server's reply to a `cmd_submit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetSubmit {
    pub seqnum: u32,
    pub devid: u32,
    pub direction: u32,
    pub ep: u32,
    pub status: i32,
    pub actual_length: u32,
    pub start_frame: u32,
    pub number_of_packets: u32,
    pub error_count: u32,
    pub setup: [u8; SETUP_LEN],
}

impl RetSubmit {
    pub fn ok(seqnum: u32, devid: u32, direction: u32, ep: u32, actual_length: u32) -> Self {
        RetSubmit {
            seqnum,
            devid,
            direction,
            ep,
            status: 0,
            actual_length,
            start_frame: 0,
            number_of_packets: 0,
            error_count: 0,
            setup: [0; SETUP_LEN],
        }
    }

    pub fn write_to(
        &self,
        w: &mut impl Write,
        in_payload: &[u8],
        iso_descriptors: &[IsoPacketDescriptor],
    ) -> Result<(), WireError> {
        write_u32(w, RET_SUBMIT)?;
        write_u32(w, self.seqnum)?;
        write_u32(w, self.devid)?;
        write_u32(w, self.direction)?;
        write_u32(w, self.ep)?;
        write_u32(w, self.status as u32)?;
        write_u32(w, self.actual_length)?;
        write_u32(w, self.start_frame)?;
        write_u32(w, self.number_of_packets)?;
        write_u32(w, self.error_count)?;
        write_all_or(w, &self.setup)?;

        if self.direction == DIR_IN && !in_payload.is_empty() {
            write_all_or(w, in_payload)?;
        }
        for desc in iso_descriptors {
            desc.write_to(w)?;
        }
        Ok(())
    }

    pub fn read_header_from(r: &mut impl Read) -> Result<Self, WireError> {
        let command = read_u32(r)?;
        if command != RET_SUBMIT {
            return Err(WireError::UnknownOpcode(command as u16));
        }
        let seqnum = read_u32(r)?;
        let devid = read_u32(r)?;
        let direction = read_u32(r)?;
        let ep = read_u32(r)?;
        let status = read_u32(r)? as i32;
        let actual_length = read_u32(r)?;
        let start_frame = read_u32(r)?;
        let number_of_packets = read_u32(r)?;
        let error_count = read_u32(r)?;
        let mut setup = [0u8; SETUP_LEN];
        read_exact_or(r, &mut setup)?;
        Ok(RetSubmit {
            seqnum,
            devid,
            direction,
            ep,
            status,
            actual_length,
            start_frame,
            number_of_packets,
            error_count,
            setup,
        })
    }

    /// Number of trailing payload bytes the reader must still consume
    /// after this header, per the frame layout: an IN transfer carries
    /// `actual_length` bytes of payload.
    pub fn payload_len(&self) -> usize {
        if self.direction == DIR_IN {
            self.actual_length as usize
        } else {
            0
        }
    }

    pub fn has_iso_packets(&self) -> bool {
        self.number_of_packets > 0
    }
}

/// One entry of the iso-packet descriptor array that follows the payload
/// on an OUT isochronous `cmd_submit`, or follows the (to-be-filled)
/// payload region on an IN `ret_submit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IsoPacketDescriptor {
    pub offset: u32,
    pub length: u32,
    pub actual_length: u32,
    pub status: u32,
}

impl IsoPacketDescriptor {
    pub fn write_to(&self, w: &mut impl Write) -> Result<(), WireError> {
        write_u32(w, self.offset)?;
        write_u32(w, self.length)?;
        write_u32(w, self.actual_length)?;
        write_u32(w, self.status)
    }

    pub fn read_from(r: &mut impl Read) -> Result<Self, WireError> {
        Ok(IsoPacketDescriptor {
            offset: read_u32(r)?,
            length: read_u32(r)?,
            actual_length: read_u32(r)?,
            status: read_u32(r)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cmd() -> CmdSubmit {
        CmdSubmit {
            seqnum: 2,
            devid: (1 << 16) | 2,
            direction: DIR_IN,
            ep: 1,
            flags: 0,
            transfer_buffer_length: 512,
            start_frame: 0,
            number_of_packets: 0,
            interval: 0,
            setup: [0; SETUP_LEN],
        }
    }

    #[test]
    fn cmd_submit_header_is_48_bytes() {
        let mut buf = Vec::new();
        sample_cmd().write_to(&mut buf, &[], &[]).unwrap();
        assert_eq!(buf.len(), HEADER_LEN);
    }

    #[test]
    fn cmd_submit_round_trips_header() {
        let cmd = sample_cmd();
        let mut buf = Vec::new();
        cmd.write_to(&mut buf, &[], &[]).unwrap();
        let decoded = CmdSubmit::read_header_from(&mut &buf[..]).unwrap();
        assert_eq!(decoded, cmd);
    }

    #[test]
    fn cmd_submit_out_payload_follows_header_only_when_out() {
        let mut cmd = sample_cmd();
        cmd.direction = DIR_OUT;
        cmd.transfer_buffer_length = 3;
        let mut buf = Vec::new();
        cmd.write_to(&mut buf, &[1, 2, 3], &[]).unwrap();
        assert_eq!(buf.len(), HEADER_LEN + 3);
        assert_eq!(&buf[HEADER_LEN..], &[1, 2, 3]);
    }

    #[test]
    fn ret_submit_round_trips_and_reports_payload_len() {
        let ret = RetSubmit::ok(2, (1 << 16) | 2, DIR_IN, 1, 200);
        let mut buf = Vec::new();
        let payload = vec![0xAB; 200];
        ret.write_to(&mut buf, &payload, &[]).unwrap();
        let decoded = RetSubmit::read_header_from(&mut &buf[..HEADER_LEN]).unwrap();
        assert_eq!(decoded, ret);
        assert_eq!(decoded.payload_len(), 200);
    }

    #[test]
    fn setup_bytes_survive_the_pipeline_unchanged() {
        let mut cmd = sample_cmd();
        cmd.direction = DIR_OUT;
        cmd.setup = [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00];
        let mut buf = Vec::new();
        cmd.write_to(&mut buf, &[], &[]).unwrap();
        let decoded = CmdSubmit::read_header_from(&mut &buf[..]).unwrap();
        assert_eq!(decoded.setup, cmd.setup);
    }

    #[test]
    fn iso_packet_descriptor_round_trips() {
        let desc = IsoPacketDescriptor {
            offset: 4,
            length: 188,
            actual_length: 100,
            status: 0,
        };
        let mut buf = Vec::new();
        desc.write_to(&mut buf).unwrap();
        let decoded = IsoPacketDescriptor::read_from(&mut &buf[..]).unwrap();
        assert_eq!(decoded, desc);
    }
}
