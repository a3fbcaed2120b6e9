//! Transport abstraction (§5 ambient stack).
//!
//! The teacher talks to hardware through a scheme file descriptor;
//! this crate talks to a remote usbip server over TCP, so the
//! equivalent seam is a small [`Socket`] trait the dispatcher (C7) reads
//! and writes through, with a `socket2`-backed realization (grounded on
//! `pdh11-cotton`'s `cotton-ssdp` use of `socket2` for datagram socket
//! tuning) providing the actual keepalive knobs, and an in-memory pipe
//! realization the test suite drives instead of a real network socket.

use std::io;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};

/// TCP keepalive tuning applied to every usbip connection: idle for 30s,
/// then probe up to 9 times at a 10s interval before the peer is
/// considered gone. These numbers mirror the defaults Linux's `usbip`
/// client configures on its own sockets.
pub const KEEPALIVE_IDLE: Duration = Duration::from_secs(30);
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);
pub const KEEPALIVE_RETRIES: u32 = 9;

/// What the dispatcher needs from a transport: ordered byte delivery,
/// best-effort partial writes (for the registry's write-cursor
/// continuation), and a way to notice the peer going away.
pub trait Socket: Send {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn disconnect(&mut self) -> io::Result<()>;
}

pub struct TcpSocket {
    stream: TcpStream,
}

impl TcpSocket {
    pub fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Self::apply_keepalive(&stream)?;
        Ok(TcpSocket { stream })
    }

    fn apply_keepalive(stream: &TcpStream) -> io::Result<()> {
        let keepalive = TcpKeepalive::new()
            .with_time(KEEPALIVE_IDLE)
            .with_interval(KEEPALIVE_INTERVAL)
            .with_retries(KEEPALIVE_RETRIES);
        SockRef::from(stream).set_tcp_keepalive(&keepalive)
    }
}

impl Socket for TcpSocket {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        use std::io::Write;
        self.stream.write(buf)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use std::io::Read;
        self.stream.read(buf)
    }

    fn disconnect(&mut self) -> io::Result<()> {
        self.stream.shutdown(std::net::Shutdown::Both)
    }
}

/// Exposed (not test-gated) so integration tests in `tests/` can drive
/// the dispatcher without a real TCP connection.
pub mod mock {
    use super::*;
    use std::collections::VecDeque;

    /// An in-memory duplex byte pipe standing in for a TCP socket in
    /// tests: `inbound` is drained by `recv`, everything passed to
    /// `send` lands in `outbound` for the test to inspect.
    #[derive(Default)]
    pub struct MockSocket {
        pub inbound: VecDeque<u8>,
        pub outbound: Vec<u8>,
        pub disconnected: bool,
        /// Caps how many bytes a single `send` accepts, to exercise the
        /// registry's partial-write continuation.
        pub send_chunk: Option<usize>,
    }

    impl Socket for MockSocket {
        fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = self.send_chunk.unwrap_or(buf.len()).min(buf.len());
            self.outbound.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.inbound.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.inbound.pop_front().unwrap();
            }
            Ok(n)
        }

        fn disconnect(&mut self) -> io::Result<()> {
            self.disconnected = true;
            Ok(())
        }
    }

    impl MockSocket {
        pub fn push_inbound(&mut self, bytes: &[u8]) {
            self.inbound.extend(bytes.iter().copied());
        }
    }

    /// A [`MockSocket`] shared between a test (which feeds `inbound` and
    /// inspects `outbound`) and the dispatcher (which only sees it
    /// through the [`Socket`] trait, via a `Box<dyn Socket>`).
    #[derive(Clone, Default)]
    pub struct SharedMockSocket(pub std::sync::Arc<std::sync::Mutex<MockSocket>>);

    impl SharedMockSocket {
        pub fn push_inbound(&self, bytes: &[u8]) {
            self.0.lock().unwrap().push_inbound(bytes);
        }

        pub fn outbound(&self) -> Vec<u8> {
            self.0.lock().unwrap().outbound.clone()
        }
    }

    impl Socket for SharedMockSocket {
        fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().send(buf)
        }

        fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.lock().unwrap().recv(buf)
        }

        fn disconnect(&mut self) -> io::Result<()> {
            self.0.lock().unwrap().disconnect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockSocket;
    use super::*;

    #[test]
    fn mock_socket_round_trips_bytes() {
        let mut sock = MockSocket::default();
        sock.push_inbound(&[1, 2, 3]);
        let mut buf = [0u8; 3];
        assert_eq!(sock.recv(&mut buf).unwrap(), 3);
        assert_eq!(buf, [1, 2, 3]);
    }

    #[test]
    fn mock_socket_honors_chunked_sends() {
        let mut sock = MockSocket {
            send_chunk: Some(2),
            ..Default::default()
        };
        let n = sock.send(&[1, 2, 3, 4]).unwrap();
        assert_eq!(n, 2);
        assert_eq!(sock.outbound, vec![1, 2]);
    }
}
