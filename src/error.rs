//! Error taxonomy for the VHCI core.
//!
//! Each concern gets its own `thiserror` enum; [`VhciError`] is the
//! crate-wide union returned from the public API boundary (session
//! attach/detach, URB submission). The client-visible codes mirror
//! the taxonomy in the wire protocol's control plane so a caller can
//! map a failure straight onto `{NETWORK, PROTOCOL, VERSION, USB_VER,
//! PORTFULL, DRIVER, NOTEXIST, INVARG, GENERAL}`.

use thiserror::Error;

/// Client-side error taxonomy (`usbip_vhci::ClientError` in logs/CLI surfaces).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientError {
    General,
    InvalidArgument,
    Network,
    Protocol,
    Version,
    UsbVersion,
    PortFull,
    Driver,
    NotExist,
}

/// Server-originated `op_status` values from `op_common`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    Ok,
    NotAvailable,
    DeviceBusy,
    DeviceError,
    NoDevice,
    Error(u32),
}

impl OpStatus {
    pub fn from_wire(value: u32) -> Self {
        match value {
            0 => OpStatus::Ok,
            1 => OpStatus::NotAvailable,
            2 => OpStatus::DeviceBusy,
            3 => OpStatus::DeviceError,
            4 => OpStatus::NoDevice,
            other => OpStatus::Error(other),
        }
    }

    pub fn is_ok(self) -> bool {
        matches!(self, OpStatus::Ok)
    }
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },
    #[error("unsupported op_common version 0x{0:04x}")]
    UnsupportedVersion(u16),
    #[error("unknown opcode 0x{0:04x}")]
    UnknownOpcode(u16),
    #[error("bus_id `{0}` is not valid ASCII or exceeds 31 bytes")]
    InvalidBusId(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("malformed device descriptor: bLength={length} bDescriptorType={kind}")]
    MalformedDevice { length: u8, kind: u8 },
    #[error("malformed configuration descriptor: bLength={length} bDescriptorType={kind} wTotalLength={total_length}")]
    MalformedConfig {
        length: u8,
        kind: u8,
        total_length: u16,
    },
    #[error("malformed string descriptor: bLength={0}")]
    MalformedString(u8),
    #[error("fewer than {expected} endpoint descriptors followed interface {interface}")]
    MissingEndpoints { interface: u8, expected: u8 },
    #[error("active configuration bNumInterfaces={config} does not match import reply bNumInterfaces={reply}")]
    InterfaceCountMismatch { config: u8, reply: u8 },
}

#[derive(Debug, Error)]
pub enum UrbError {
    #[error("URB function code 0x{0:04x} is not supported by this translator")]
    Unsupported(u16),
    #[error("SYNC_RESET_PIPE_AND_CLEAR_STALL issued against the default control pipe")]
    ResetControlPipe,
    #[error("transfer buffer length {got} does not match declared length {expected}")]
    BufferLengthMismatch { expected: usize, got: usize },
    #[error("no transfer buffer supplied for a non-zero-length transfer")]
    MissingBuffer,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("device is not plugged in")]
    NotConnected,
    #[error("no outstanding request with seqnum {0:#x}")]
    UnknownSeqnum(u32),
    #[error("request was cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("network error: {0}")]
    Network(#[source] std::io::Error),
    #[error("wire protocol error: {0}")]
    Protocol(#[from] WireError),
    #[error("server rejected import: {0:?}")]
    ImportRejected(OpStatus),
    #[error("server echoed bus_id `{got}`, expected `{expected}`")]
    BusIdMismatch { expected: String, got: String },
    #[error("server op_common version 0x{0:04x} unsupported")]
    VersionMismatch(u16),
    #[error("device speed {0:?} does not match the requested USB generation")]
    UsbGenerationMismatch(crate::session::Speed),
    #[error("descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),
    #[error("hub has no free port for speed class {0:?}")]
    PortFull(crate::hub::SpeedClass),
    #[error("device descriptor mismatch against import reply")]
    DeviceDescriptorMismatch,
    #[error("registry error during descriptor enumeration: {0}")]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Error)]
pub enum VhciError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Urb(#[from] UrbError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Wire(#[from] WireError),
}

impl VhciError {
    /// Maps any crate-internal error onto the client-visible taxonomy used
    /// by the (out of scope) CLI front-end's exit codes.
    pub fn client_error(&self) -> ClientError {
        match self {
            VhciError::Session(SessionError::Network(_)) => ClientError::Network,
            VhciError::Session(SessionError::Protocol(_)) => ClientError::Protocol,
            VhciError::Session(SessionError::BusIdMismatch { .. }) => ClientError::Protocol,
            VhciError::Session(SessionError::VersionMismatch(_)) => ClientError::Version,
            VhciError::Session(SessionError::UsbGenerationMismatch(_)) => ClientError::UsbVersion,
            VhciError::Session(SessionError::ImportRejected(_)) => ClientError::Driver,
            VhciError::Session(SessionError::PortFull(_)) => ClientError::PortFull,
            VhciError::Session(SessionError::Descriptor(_)) => ClientError::Protocol,
            VhciError::Session(SessionError::DeviceDescriptorMismatch) => ClientError::Protocol,
            VhciError::Session(SessionError::Registry(_)) => ClientError::Driver,
            VhciError::Registry(RegistryError::NotConnected) => ClientError::NotExist,
            VhciError::Registry(_) => ClientError::Driver,
            VhciError::Urb(_) => ClientError::InvalidArgument,
            VhciError::Descriptor(_) => ClientError::Protocol,
            VhciError::Wire(_) => ClientError::Network,
        }
    }

    /// Packs `(port, error_code)` into the single 32-bit word the legacy
    /// wire/CLI surface expects: low 16 bits carry the port on success,
    /// high 16 bits carry the [`ClientError`] on failure.
    pub fn pack_result(result: Result<u16, VhciError>) -> u32 {
        match result {
            Ok(port) => port as u32,
            Err(err) => (client_error_code(err.client_error()) as u32) << 16,
        }
    }
}

fn client_error_code(err: ClientError) -> u16 {
    match err {
        ClientError::General => 1,
        ClientError::InvalidArgument => 2,
        ClientError::Network => 3,
        ClientError::Protocol => 4,
        ClientError::Version => 5,
        ClientError::UsbVersion => 6,
        ClientError::PortFull => 7,
        ClientError::Driver => 8,
        ClientError::NotExist => 9,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_result_success_carries_port_in_low_half() {
        let packed = VhciError::pack_result(Ok(3));
        assert_eq!(packed, 3);
        assert_eq!(packed >> 16, 0);
    }

    #[test]
    fn pack_result_failure_carries_code_in_high_half() {
        let packed = VhciError::pack_result(Err(VhciError::Registry(RegistryError::NotConnected)));
        assert_eq!(packed & 0xFFFF, 0);
        assert_eq!(packed >> 16, client_error_code(ClientError::NotExist) as u32);
    }
}
