//! Session dispatcher (C7): drives one TCP connection's reader and
//! writer halves against a [`VirtualDevice`]'s [`Registry`].
//!
//! Grounded on the teacher's `xhcid` main loop, which alternates between
//! draining a completion queue and feeding new work to the controller;
//! here the two halves run as independent blocking loops (§5), one per
//! direction, since a usbip TCP stream has no shared ring buffer to
//! poll — `write_step`/`read_step` are the unit of work each thread
//! repeats, factored out so they can be driven synchronously in tests
//! without spawning real threads.

use std::io;
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::Receiver;

use crate::error::RegistryError;
use crate::hub::SpeedClass;
use crate::registry::Registry;
use crate::session::VirtualDevice;
use crate::socket::Socket;
use crate::urb::{Urb, UrbCompletion};
use crate::wire::{RetSubmit, RET_SUBMIT};

fn read_exact_blocking(socket: &mut dyn Socket, buf: &mut [u8]) -> io::Result<()> {
    let mut got = 0;
    while got < buf.len() {
        let n = socket.recv(&mut buf[got..])?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "socket closed mid-read"));
        }
        got += n;
    }
    Ok(())
}

const HEADER_LEN: usize = 48;

pub struct Dispatcher {
    device: Arc<VirtualDevice>,
    socket: Box<dyn Socket>,
}

impl Dispatcher {
    pub fn new(device: Arc<VirtualDevice>, socket: Box<dyn Socket>) -> Self {
        Dispatcher { device, socket }
    }

    pub fn registry(&self) -> &Registry {
        &self.device.registry
    }

    pub fn submit(&self, urb: Urb) -> Result<(u32, Receiver<UrbCompletion>), RegistryError> {
        self.registry().enqueue(urb)
    }

    /// One unit of writer-thread work: sends as much of the
    /// in-progress partial write as the socket accepts, or starts a new
    /// URBR if none is in progress. Returns `Ok(true)` if any work was
    /// done, `Ok(false)` if the pending queue and write cursor were both
    /// empty (the writer thread should then block on new work).
    pub fn write_step(&mut self) -> io::Result<bool> {
        if let Some(remaining) = self.registry().pending_write() {
            let n = self.socket.send(&remaining)?;
            self.registry().advance_write(n);
            return Ok(true);
        }

        let urbr = match self.registry().pop_pending() {
            Some(urbr) => urbr,
            None => return Ok(false),
        };

        let seqnum = urbr.seqnum;
        let devid = self.device.devid;
        match urbr.urb.submit_plan(seqnum, devid) {
            Ok(crate::urb::SubmitPlan::Wire { cmd, out_payload, iso_descriptors, then_abort_pipe }) => {
                let mut frame = Vec::with_capacity(HEADER_LEN + out_payload.len());
                cmd.write_to(&mut frame, &out_payload, &iso_descriptors)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                self.registry().begin_write(urbr, frame);
                // §4.3: SYNC_RESET_PIPE_AND_CLEAR_STALL cancels every
                // other URBR on the pipe as soon as CLEAR_FEATURE is
                // queued, not once its own reply arrives — otherwise
                // in-flight URBRs on the same pipe could still complete
                // with real data during the round trip.
                if let Some(pipe) = then_abort_pipe {
                    self.registry().abort_pipe(pipe);
                }
            }
            Ok(crate::urb::SubmitPlan::Local(completion)) => {
                self.registry().complete_local(urbr, completion);
            }
            Ok(crate::urb::SubmitPlan::AbortPipe(pipe)) => {
                self.registry().abort_pipe(pipe);
                self.registry().complete_local(urbr, UrbCompletion::ok(0, Vec::new()));
            }
            Err(err) => {
                self.registry()
                    .complete_local(urbr, UrbCompletion { status: crate::urb::UrbStatus::Error(-22), actual_length: 0, data: Vec::new(), iso_packets: Vec::new() });
                log::warn!("URB submission rejected: {err}");
            }
        }
        Ok(true)
    }

    /// One unit of reader-thread work: blocks until a full `ret_submit`
    /// frame has arrived, then routes it through the registry. An
    /// unmatched seqnum (peer confusion, or a completion that raced a
    /// local `abort_pipe` cancellation) is logged and dropped, never
    /// panicked on. `ret_unlink` never arrives unprompted: cancellation
    /// is handled entirely locally (§4.3, §4.4) and this dispatcher never
    /// issues `cmd_unlink`.
    pub fn read_step(&mut self) -> io::Result<()> {
        let mut header = [0u8; HEADER_LEN];
        read_exact_blocking(&mut *self.socket, &mut header)?;
        let command = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);

        match command {
            RET_SUBMIT => {
                let ret = RetSubmit::read_header_from(&mut &header[..])
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                let mut payload = vec![0u8; ret.payload_len()];
                read_exact_blocking(&mut *self.socket, &mut payload)?;
                let mut iso = Vec::with_capacity(ret.number_of_packets as usize);
                for _ in 0..ret.number_of_packets {
                    let mut buf = [0u8; 16];
                    read_exact_blocking(&mut *self.socket, &mut buf)?;
                    iso.push(
                        crate::wire::IsoPacketDescriptor::read_from(&mut &buf[..])
                            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
                    );
                }
                let seqnum = ret.seqnum;
                if self.registry().complete(seqnum, |urb| urb.apply_reply(&ret, payload, iso)).is_err() {
                    log::warn!("ret_submit for unknown seqnum {seqnum:#x}, dropping");
                }
            }
            other => {
                log::warn!("unexpected command 0x{other:08x} on device stream, dropping frame");
            }
        }
        Ok(())
    }

    /// Spawns the reader and writer halves as separate OS threads (§5's
    /// concurrency model). Both share the one `Dispatcher` (and so the
    /// one socket) behind a `Mutex`: the abstract [`Socket`] trait has no
    /// split-read/split-write half the way a real `TcpStream` does, so
    /// unlike the teacher's independent hardware ring buffers, reads and
    /// writes here briefly contend for the same lock rather than running
    /// fully in parallel.
    pub fn spawn(self) -> (thread::JoinHandle<()>, thread::JoinHandle<()>) {
        let shared = Arc::new(Mutex::new(self));

        let reader = {
            let shared = shared.clone();
            thread::spawn(move || loop {
                let result = shared.lock().unwrap().read_step();
                if let Err(err) = result {
                    log::info!("dispatcher reader loop exiting: {err}");
                    shared.lock().unwrap().device.disconnect();
                    break;
                }
            })
        };

        let writer = thread::spawn(move || loop {
            match shared.lock().unwrap().write_step() {
                Ok(true) => {}
                Ok(false) => thread::sleep(std::time::Duration::from_millis(10)),
                Err(err) => {
                    log::info!("dispatcher writer loop exiting: {err}");
                    shared.lock().unwrap().device.disconnect();
                    break;
                }
            }
        });

        (reader, writer)
    }
}

pub fn speed_class_of(device: &VirtualDevice) -> SpeedClass {
    SpeedClass::of(device.speed().unwrap_or(crate::session::Speed::Unknown))
}
