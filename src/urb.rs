//! URB ↔ USB/IP packet translator (C3).
//!
//! The teacher's design notes call for "a single sealed handler
//! trait/interface per URB function ... dispatch by function code" in
//! place of the original's parallel function-pointer tables. Since the
//! set of supported URB functions is closed and known at compile time,
//! the idiomatic Rust realization of that is an exhaustive `match` over
//! a tagged [`Urb`] enum (see SPEC_FULL.md §9) rather than a trait-object
//! table — so [`Urb::submit_plan`] and [`Urb::apply_reply`] are plain
//! methods, one `match` arm per URB function.

use crate::pipe::PipeHandle;
use crate::wire::{CmdSubmit, IsoPacketDescriptor, RetSubmit, DIR_IN, DIR_OUT};
use crate::error::UrbError;

/// Numeric function codes, used only to report [`UrbError::Unsupported`]
/// for the functions this translator deliberately does not implement.
pub mod function_code {
    pub const GET_MS_FEATURE_DESCRIPTOR: u16 = 0xF000;
    pub const GET_ISOCH_PIPE_TRANSFER_PATH_DELAYS: u16 = 0xF001;
    pub const OPEN_STATIC_STREAMS: u16 = 0xF002;
}

/// Fields common to every URB function that carries a transfer buffer,
/// corresponding to the teacher's shared `TransferCommon` prefix
/// (`pipe_handle`, `transfer_flags`, `transfer_buffer_length`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCommon {
    pub pipe: PipeHandle,
    pub flags: u32,
    /// `TransferBufferLength`. For OUT transfers this must equal
    /// `buffer.len()`; for IN transfers it is the amount requested.
    pub length: u32,
    /// OUT payload to send, empty for IN transfers.
    pub buffer: Vec<u8>,
}

impl TransferCommon {
    fn direction(&self) -> u32 {
        if self.pipe.is_in() {
            DIR_IN
        } else {
            DIR_OUT
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestRecipient {
    Device,
    Interface,
    Endpoint,
    Other,
}

impl RequestRecipient {
    fn bits(self) -> u8 {
        match self {
            RequestRecipient::Device => 0,
            RequestRecipient::Interface => 1,
            RequestRecipient::Endpoint => 2,
            RequestRecipient::Other => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Standard,
    Class,
    Vendor,
}

impl RequestType {
    fn bits(self) -> u8 {
        match self {
            RequestType::Standard => 0,
            RequestType::Class => 1,
            RequestType::Vendor => 2,
        }
    }
}

mod standard_request {
    pub const GET_STATUS: u8 = 0;
    pub const CLEAR_FEATURE: u8 = 1;
    pub const SET_FEATURE: u8 = 3;
    pub const SET_ADDRESS: u8 = 5;
    pub const GET_DESCRIPTOR: u8 = 6;
    pub const SET_DESCRIPTOR: u8 = 7;
    pub const GET_CONFIGURATION: u8 = 8;
    pub const SET_CONFIGURATION: u8 = 9;
    pub const GET_INTERFACE: u8 = 10;
    pub const SET_INTERFACE: u8 = 11;
}

pub const ENDPOINT_HALT_FEATURE: u16 = 0;

/// The 8-byte USB SETUP packet, built according to the standard request
/// rules in §4.3: `bmRequestType = dir | type | recipient`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    fn new(
        dir_in: bool,
        ty: RequestType,
        recipient: RequestRecipient,
        request: u8,
        value: u16,
        index: u16,
        length: u16,
    ) -> Self {
        let bm_request_type =
            ((dir_in as u8) << 7) | (ty.bits() << 5) | recipient.bits();
        SetupPacket {
            request_type: bm_request_type,
            request,
            value,
            index,
            length,
        }
    }

    pub fn is_in(self) -> bool {
        self.request_type & 0x80 != 0
    }

    pub fn to_bytes(self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[0] = self.request_type;
        buf[1] = self.request;
        buf[2..4].copy_from_slice(&self.value.to_le_bytes());
        buf[4..6].copy_from_slice(&self.index.to_le_bytes());
        buf[6..8].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        SetupPacket {
            request_type: bytes[0],
            request: bytes[1],
            value: u16::from_le_bytes([bytes[2], bytes[3]]),
            index: u16::from_le_bytes([bytes[4], bytes[5]]),
            length: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }

    /// `GET_DESCRIPTOR`: `wValue = (descriptor_type << 8) | index`,
    /// `wIndex = language_id`.
    pub fn get_descriptor(descriptor_type: u8, index: u8, language_id: u16, length: u16) -> Self {
        Self::new(
            true,
            RequestType::Standard,
            RequestRecipient::Device,
            standard_request::GET_DESCRIPTOR,
            ((descriptor_type as u16) << 8) | index as u16,
            language_id,
            length,
        )
    }

    pub fn set_descriptor(descriptor_type: u8, index: u8, language_id: u16, length: u16) -> Self {
        Self::new(
            false,
            RequestType::Standard,
            RequestRecipient::Device,
            standard_request::SET_DESCRIPTOR,
            ((descriptor_type as u16) << 8) | index as u16,
            language_id,
            length,
        )
    }

    /// `SELECT_CONFIGURATION`: `SET_CONFIGURATION`, `wValue =
    /// bConfigurationValue` (or 0 for "unconfigured" — preserved verbatim
    /// per the open question decision in SPEC_FULL.md, even though Linux
    /// usbip servers are documented elsewhere as expecting `-1`).
    pub fn select_configuration(configuration_value: Option<u8>) -> Self {
        Self::new(
            false,
            RequestType::Standard,
            RequestRecipient::Device,
            standard_request::SET_CONFIGURATION,
            configuration_value.unwrap_or(0) as u16,
            0,
            0,
        )
    }

    pub fn select_interface(interface_number: u8, alternate_setting: u8) -> Self {
        Self::new(
            false,
            RequestType::Standard,
            RequestRecipient::Interface,
            standard_request::SET_INTERFACE,
            alternate_setting as u16,
            interface_number as u16,
            0,
        )
    }

    pub fn get_status(recipient: RequestRecipient, index: u16) -> Self {
        Self::new(true, RequestType::Standard, recipient, standard_request::GET_STATUS, 0, index, 2)
    }

    pub fn set_feature(recipient: RequestRecipient, feature: u16, index: u16) -> Self {
        Self::new(false, RequestType::Standard, recipient, standard_request::SET_FEATURE, feature, index, 0)
    }

    pub fn clear_feature(recipient: RequestRecipient, feature: u16, index: u16) -> Self {
        Self::new(false, RequestType::Standard, recipient, standard_request::CLEAR_FEATURE, feature, index, 0)
    }

    pub fn get_configuration() -> Self {
        Self::new(true, RequestType::Standard, RequestRecipient::Device, standard_request::GET_CONFIGURATION, 0, 0, 1)
    }

    pub fn get_interface(interface_number: u8) -> Self {
        Self::new(
            true,
            RequestType::Standard,
            RequestRecipient::Interface,
            standard_request::GET_INTERFACE,
            0,
            interface_number as u16,
            1,
        )
    }

    pub fn vendor_or_class(
        ty: RequestType,
        dir_in: bool,
        recipient: RequestRecipient,
        request: u8,
        value: u16,
        index: u16,
        length: u16,
    ) -> Self {
        Self::new(dir_in, ty, recipient, request, value, index, length)
    }
}

/// Every URB function this translator supports (§4.3). Functions that
/// need no wire traffic or are deliberately unimplemented are handled in
/// [`Urb::submit_plan`] without reaching [`SubmitPlan::Wire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Urb {
    BulkOrInterrupt(TransferCommon),
    Isoch {
        common: TransferCommon,
        start_frame: u32,
        packets: Vec<IsoPacketDescriptor>,
    },
    ControlTransfer {
        common: TransferCommon,
        setup: SetupPacket,
    },
    SelectConfiguration {
        configuration_value: Option<u8>,
    },
    SelectInterface {
        interface_number: u8,
        alternate_setting: u8,
    },
    GetStatus {
        recipient: RequestRecipient,
        index: u16,
    },
    SetFeature {
        recipient: RequestRecipient,
        feature: u16,
        index: u16,
    },
    ClearFeature {
        recipient: RequestRecipient,
        feature: u16,
        index: u16,
    },
    VendorOrClass {
        ty: RequestType,
        dir_in: bool,
        recipient: RequestRecipient,
        request: u8,
        value: u16,
        index: u16,
        buffer: Vec<u8>,
        length: u16,
    },
    GetConfiguration,
    GetInterface {
        interface_number: u8,
    },
    SyncResetPipeAndClearStall {
        pipe: PipeHandle,
    },
    AbortPipe {
        pipe: PipeHandle,
    },
    GetCurrentFrameNumber,
    GetMsFeatureDescriptor,
    GetIsochPipeTransferPathDelays,
    OpenStaticStreams,
}

/// Result of attempting to serialize a URB (§4.3, §4.4).
pub enum SubmitPlan {
    /// Send `cmd` (plus `out_payload`/`iso_descriptors` per the frame
    /// layout) and await a matching `ret_submit`. `then_abort_pipe` is
    /// set only for `SYNC_RESET_PIPE_AND_CLEAR_STALL`, which must cancel
    /// every other outstanding URBR on the same pipe once its own
    /// `CLEAR_FEATURE` completes.
    Wire {
        cmd: CmdSubmit,
        out_payload: Vec<u8>,
        iso_descriptors: Vec<IsoPacketDescriptor>,
        then_abort_pipe: Option<PipeHandle>,
    },
    /// Completes immediately without any wire traffic.
    Local(UrbCompletion),
    /// `ABORT_PIPE`: handled entirely by the registry, no `UrbCompletion`
    /// of its own (it's a control operation on a pipe, not an URBR).
    AbortPipe(PipeHandle),
}

/// Mirrors Linux errno values as carried (negated) in `ret_submit.status`,
/// mapped onto USBD-style statuses per §4.3.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrbStatus {
    Ok,
    Stalled,
    Cancelled,
    TransferTimeout,
    BufferOverrun,
    Crc,
    DeviceNotConnected,
    Error(i32),
}

impl UrbStatus {
    pub fn from_errno(status: i32) -> Self {
        match status {
            0 => UrbStatus::Ok,
            -32 => UrbStatus::Stalled,        // EPIPE
            -2 | -104 => UrbStatus::Cancelled, // ENOENT, ECONNRESET
            -110 => UrbStatus::TransferTimeout, // ETIMEDOUT
            -75 => UrbStatus::BufferOverrun,  // EOVERFLOW
            -71 | -84 => UrbStatus::Crc,       // EPROTO, EILSEQ
            -19 | -108 => UrbStatus::DeviceNotConnected, // ENODEV, ESHUTDOWN
            other => UrbStatus::Error(other),
        }
    }

    pub fn is_ok(self) -> bool {
        matches!(self, UrbStatus::Ok)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrbCompletion {
    pub status: UrbStatus,
    pub actual_length: u32,
    /// Populated only for IN transfers.
    pub data: Vec<u8>,
    pub iso_packets: Vec<IsoPacketDescriptor>,
}

impl UrbCompletion {
    pub fn ok(actual_length: u32, data: Vec<u8>) -> Self {
        UrbCompletion {
            status: UrbStatus::Ok,
            actual_length,
            data,
            iso_packets: Vec::new(),
        }
    }

    pub fn cancelled() -> Self {
        UrbCompletion {
            status: UrbStatus::Cancelled,
            actual_length: 0,
            data: Vec::new(),
            iso_packets: Vec::new(),
        }
    }

    pub fn not_connected() -> Self {
        UrbCompletion {
            status: UrbStatus::DeviceNotConnected,
            actual_length: 0,
            data: Vec::new(),
            iso_packets: Vec::new(),
        }
    }
}

impl Urb {
    /// Convenience constructor for a `GET_DESCRIPTOR` control transfer on
    /// the default pipe, used by the session's descriptor enumeration
    /// sequence (§4.5).
    pub fn get_descriptor(descriptor_type: u8, index: u8, language_id: u16, length: u16) -> Self {
        Urb::ControlTransfer {
            common: TransferCommon {
                pipe: PipeHandle::DEFAULT,
                flags: 0,
                length: length as u32,
                buffer: Vec::new(),
            },
            setup: SetupPacket::get_descriptor(descriptor_type, index, language_id, length),
        }
    }

    /// The pipe this URB targets, for registry bookkeeping and
    /// abort-pipe scanning. The default control pipe for control-style
    /// requests that don't carry their own `TransferCommon`.
    pub fn pipe(&self) -> PipeHandle {
        match self {
            Urb::BulkOrInterrupt(c) | Urb::Isoch { common: c, .. } | Urb::ControlTransfer { common: c, .. } => c.pipe,
            Urb::SyncResetPipeAndClearStall { pipe } | Urb::AbortPipe { pipe } => *pipe,
            _ => PipeHandle::DEFAULT,
        }
    }

    /// The `TransferBufferLength` originally requested, mirroring what
    /// [`Urb::submit_plan`] puts in `cmd_submit.transfer_buffer_length`
    /// for each function. Used on the reply path to clamp a peer's
    /// `actual_length` down to what was actually asked for (§4.3).
    fn requested_length(&self) -> u32 {
        match self {
            Urb::BulkOrInterrupt(c) | Urb::Isoch { common: c, .. } => c.length,
            Urb::ControlTransfer { setup, .. } => setup.length as u32,
            Urb::VendorOrClass { length, .. } => *length as u32,
            Urb::GetStatus { .. } => 2,
            Urb::GetConfiguration | Urb::GetInterface { .. } => 1,
            Urb::SelectConfiguration { .. }
            | Urb::SelectInterface { .. }
            | Urb::SetFeature { .. }
            | Urb::ClearFeature { .. }
            | Urb::SyncResetPipeAndClearStall { .. } => 0,
            Urb::AbortPipe { .. }
            | Urb::GetCurrentFrameNumber
            | Urb::GetMsFeatureDescriptor
            | Urb::GetIsochPipeTransferPathDelays
            | Urb::OpenStaticStreams => 0,
        }
    }

    pub fn submit_plan(&self, seqnum: u32, devid: u32) -> Result<SubmitPlan, UrbError> {
        match self {
            Urb::BulkOrInterrupt(common) => Ok(wire_plan(seqnum, devid, common, [0u8; 8], 0, 0, None)),
            Urb::Isoch { common, start_frame, packets } => {
                let cmd = CmdSubmit {
                    seqnum,
                    devid,
                    direction: common.direction(),
                    ep: common.pipe.endpoint_number() as u32,
                    flags: common.flags,
                    transfer_buffer_length: common.length,
                    start_frame: *start_frame,
                    number_of_packets: packets.len() as u32,
                    interval: common.pipe.interval() as u32,
                    setup: [0; 8],
                };
                Ok(SubmitPlan::Wire {
                    cmd,
                    out_payload: common.buffer.clone(),
                    iso_descriptors: packets.clone(),
                    then_abort_pipe: None,
                })
            }
            Urb::ControlTransfer { common, setup } => {
                if common.buffer.len() as u32 > setup.length as u32 {
                    return Err(UrbError::BufferLengthMismatch {
                        expected: setup.length as usize,
                        got: common.buffer.len(),
                    });
                }
                let direction = if setup.is_in() { DIR_IN } else { DIR_OUT };
                let cmd = CmdSubmit {
                    seqnum,
                    devid,
                    direction,
                    ep: 0,
                    flags: common.flags,
                    transfer_buffer_length: setup.length as u32,
                    start_frame: 0,
                    number_of_packets: 0,
                    interval: 0,
                    setup: setup.to_bytes(),
                };
                Ok(SubmitPlan::Wire {
                    cmd,
                    out_payload: common.buffer.clone(),
                    iso_descriptors: Vec::new(),
                    then_abort_pipe: None,
                })
            }
            Urb::SelectConfiguration { configuration_value } => {
                control_plan(seqnum, devid, SetupPacket::select_configuration(*configuration_value), &[])
            }
            Urb::SelectInterface { interface_number, alternate_setting } => control_plan(
                seqnum,
                devid,
                SetupPacket::select_interface(*interface_number, *alternate_setting),
                &[],
            ),
            Urb::GetStatus { recipient, index } => {
                control_plan(seqnum, devid, SetupPacket::get_status(*recipient, *index), &[])
            }
            Urb::SetFeature { recipient, feature, index } => {
                control_plan(seqnum, devid, SetupPacket::set_feature(*recipient, *feature, *index), &[])
            }
            Urb::ClearFeature { recipient, feature, index } => {
                control_plan(seqnum, devid, SetupPacket::clear_feature(*recipient, *feature, *index), &[])
            }
            Urb::VendorOrClass { ty, dir_in, recipient, request, value, index, buffer, length } => {
                let setup = SetupPacket::vendor_or_class(*ty, *dir_in, *recipient, *request, *value, *index, *length);
                control_plan(seqnum, devid, setup, buffer)
            }
            Urb::GetConfiguration => control_plan(seqnum, devid, SetupPacket::get_configuration(), &[]),
            Urb::GetInterface { interface_number } => {
                control_plan(seqnum, devid, SetupPacket::get_interface(*interface_number), &[])
            }
            Urb::SyncResetPipeAndClearStall { pipe } => {
                if pipe.is_default() {
                    return Err(UrbError::ResetControlPipe);
                }
                let setup = SetupPacket::clear_feature(
                    RequestRecipient::Endpoint,
                    ENDPOINT_HALT_FEATURE,
                    pipe.endpoint_address() as u16,
                );
                let cmd = CmdSubmit {
                    seqnum,
                    devid,
                    direction: DIR_OUT,
                    ep: 0,
                    flags: 0,
                    transfer_buffer_length: 0,
                    start_frame: 0,
                    number_of_packets: 0,
                    interval: 0,
                    setup: setup.to_bytes(),
                };
                Ok(SubmitPlan::Wire {
                    cmd,
                    out_payload: Vec::new(),
                    iso_descriptors: Vec::new(),
                    then_abort_pipe: Some(*pipe),
                })
            }
            Urb::AbortPipe { pipe } => Ok(SubmitPlan::AbortPipe(*pipe)),
            Urb::GetCurrentFrameNumber => Ok(SubmitPlan::Local(UrbCompletion::ok(0, Vec::new()))),
            Urb::GetMsFeatureDescriptor => Err(UrbError::Unsupported(function_code::GET_MS_FEATURE_DESCRIPTOR)),
            Urb::GetIsochPipeTransferPathDelays => {
                Err(UrbError::Unsupported(function_code::GET_ISOCH_PIPE_TRANSFER_PATH_DELAYS))
            }
            Urb::OpenStaticStreams => Err(UrbError::Unsupported(function_code::OPEN_STATIC_STREAMS)),
        }
    }

    /// Reply-path rules (§4.3): `actual_length` (and the payload that
    /// goes with it) is clamped to the length originally requested, maps
    /// `status`, and propagates iso packet results unchanged.
    pub fn apply_reply(&self, ret: &RetSubmit, payload: Vec<u8>, iso_packets: Vec<IsoPacketDescriptor>) -> UrbCompletion {
        let actual_length = ret.actual_length.min(self.requested_length());
        let mut data = payload;
        data.truncate(actual_length as usize);
        UrbCompletion {
            status: UrbStatus::from_errno(ret.status),
            actual_length,
            data,
            iso_packets,
        }
    }
}

fn wire_plan(
    seqnum: u32,
    devid: u32,
    common: &TransferCommon,
    setup: [u8; 8],
    start_frame: u32,
    number_of_packets: u32,
    then_abort_pipe: Option<PipeHandle>,
) -> SubmitPlan {
    let cmd = CmdSubmit {
        seqnum,
        devid,
        direction: common.direction(),
        ep: common.pipe.endpoint_number() as u32,
        flags: common.flags,
        transfer_buffer_length: common.length,
        start_frame,
        number_of_packets,
        interval: common.pipe.interval() as u32,
        setup,
    };
    SubmitPlan::Wire {
        cmd,
        out_payload: common.buffer.clone(),
        iso_descriptors: Vec::new(),
        then_abort_pipe,
    }
}

fn control_plan(seqnum: u32, devid: u32, setup: SetupPacket, buffer: &[u8]) -> Result<SubmitPlan, UrbError> {
    let direction = if setup.is_in() { DIR_IN } else { DIR_OUT };
    let cmd = CmdSubmit {
        seqnum,
        devid,
        direction,
        ep: 0,
        flags: 0,
        transfer_buffer_length: setup.length as u32,
        start_frame: 0,
        number_of_packets: 0,
        interval: 0,
        setup: setup.to_bytes(),
    };
    Ok(SubmitPlan::Wire {
        cmd,
        out_payload: buffer.to_vec(),
        iso_descriptors: Vec::new(),
        then_abort_pipe: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::EndpointDescriptor;

    fn bulk_in_pipe() -> PipeHandle {
        PipeHandle::from_endpoint(&EndpointDescriptor {
            endpoint_address: 0x81,
            attributes: 0x02,
            max_packet_size: 512,
            interval: 0,
        })
    }

    #[test]
    fn bulk_in_direction_comes_from_pipe_not_flags() {
        let common = TransferCommon {
            pipe: bulk_in_pipe(),
            flags: 0, // deliberately not set, per §4.3's "not TransferFlags" rule
            length: 512,
            buffer: Vec::new(),
        };
        let urb = Urb::BulkOrInterrupt(common);
        match urb.submit_plan(2, 0x10002).unwrap() {
            SubmitPlan::Wire { cmd, .. } => {
                assert_eq!(cmd.direction, DIR_IN);
                assert_eq!(cmd.ep, 1);
                assert_eq!(cmd.transfer_buffer_length, 512);
                assert_eq!(cmd.setup, [0; 8]);
            }
            _ => panic!("expected wire plan"),
        }
    }

    #[test]
    fn get_descriptor_setup_packet_matches_rule() {
        let setup = SetupPacket::get_descriptor(1, 0, 0, 18);
        assert_eq!(setup.value, (1u16 << 8));
        assert_eq!(setup.index, 0);
        assert_eq!(setup.length, 18);
        assert!(setup.is_in());
    }

    #[test]
    fn select_configuration_uses_zero_for_unconfigured() {
        let setup = SetupPacket::select_configuration(None);
        assert_eq!(setup.request, standard_request::SET_CONFIGURATION);
        assert_eq!(setup.value, 0);
    }

    #[test]
    fn select_interface_sets_value_and_index() {
        let setup = SetupPacket::select_interface(2, 1);
        assert_eq!(setup.value, 1);
        assert_eq!(setup.index, 2);
    }

    #[test]
    fn sync_reset_pipe_rejects_control_pipe() {
        let urb = Urb::SyncResetPipeAndClearStall { pipe: PipeHandle::DEFAULT };
        assert!(matches!(urb.submit_plan(1, 1), Err(UrbError::ResetControlPipe)));
    }

    #[test]
    fn sync_reset_pipe_schedules_abort_after_clear_feature() {
        let urb = Urb::SyncResetPipeAndClearStall { pipe: bulk_in_pipe() };
        match urb.submit_plan(1, 1).unwrap() {
            SubmitPlan::Wire { then_abort_pipe, cmd, .. } => {
                assert_eq!(then_abort_pipe, Some(bulk_in_pipe()));
                assert_eq!(cmd.setup[1], standard_request::CLEAR_FEATURE);
            }
            _ => panic!("expected wire plan"),
        }
    }

    #[test]
    fn abort_pipe_produces_no_wire_traffic() {
        let urb = Urb::AbortPipe { pipe: bulk_in_pipe() };
        assert!(matches!(urb.submit_plan(1, 1).unwrap(), SubmitPlan::AbortPipe(_)));
    }

    #[test]
    fn get_current_frame_number_completes_locally_as_zero() {
        let urb = Urb::GetCurrentFrameNumber;
        match urb.submit_plan(1, 1).unwrap() {
            SubmitPlan::Local(completion) => {
                assert!(completion.status.is_ok());
                assert_eq!(completion.actual_length, 0);
            }
            _ => panic!("expected local completion"),
        }
    }

    #[test]
    fn unimplemented_functions_are_reported_not_panicked() {
        assert!(matches!(
            Urb::GetMsFeatureDescriptor.submit_plan(1, 1),
            Err(UrbError::Unsupported(function_code::GET_MS_FEATURE_DESCRIPTOR))
        ));
        assert!(matches!(
            Urb::OpenStaticStreams.submit_plan(1, 1),
            Err(UrbError::Unsupported(function_code::OPEN_STATIC_STREAMS))
        ));
    }

    #[test]
    fn errno_status_table_matches_precedence() {
        assert_eq!(UrbStatus::from_errno(0), UrbStatus::Ok);
        assert_eq!(UrbStatus::from_errno(-32), UrbStatus::Stalled);
        assert_eq!(UrbStatus::from_errno(-2), UrbStatus::Cancelled);
        assert_eq!(UrbStatus::from_errno(-110), UrbStatus::TransferTimeout);
        assert_eq!(UrbStatus::from_errno(-19), UrbStatus::DeviceNotConnected);
        assert_eq!(UrbStatus::from_errno(-5), UrbStatus::Error(-5));
    }

    #[test]
    fn reply_reports_actual_length_and_data_within_the_request() {
        let urb = Urb::BulkOrInterrupt(TransferCommon {
            pipe: bulk_in_pipe(),
            flags: 0,
            length: 512,
            buffer: Vec::new(),
        });
        let ret = RetSubmit::ok(2, 1, DIR_IN, 1, 3);
        let completion = urb.apply_reply(&ret, vec![1, 2, 3], Vec::new());
        assert_eq!(completion.actual_length, 3);
        assert_eq!(completion.data, vec![1, 2, 3]);
        assert!(completion.status.is_ok());
    }

    #[test]
    fn reply_clamps_actual_length_and_data_to_what_was_requested() {
        let urb = Urb::get_descriptor(1, 0, 0, 18);
        // A confused or malicious peer reports more data than the 18
        // bytes asked for; the excess must never reach the caller.
        let ret = RetSubmit::ok(2, 1, DIR_IN, 0, 64);
        let completion = urb.apply_reply(&ret, vec![7u8; 64], Vec::new());
        assert_eq!(completion.actual_length, 18);
        assert_eq!(completion.data.len(), 18);
    }
}
