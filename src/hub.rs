//! Virtual hub and port table (C6).
//!
//! Grounded on the teacher's `usb::hub::Hub`, which keeps a fixed-size
//! `Vec<Option<PortState>>` indexed by port number and protects it with a
//! lock shared across the driver's worker threads; this module keeps the
//! same shape but splits the table in two, one per USB generation, since
//! §6 requires USB2 and USB3 devices to never share a port range.

use std::sync::{Arc, Mutex};

use crate::session::{Speed, VirtualDevice};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpeedClass {
    Usb2,
    Usb3,
}

impl SpeedClass {
    pub fn of(speed: Speed) -> Self {
        if speed.is_usb2() {
            SpeedClass::Usb2
        } else {
            SpeedClass::Usb3
        }
    }
}

/// Port counts mirror a typical Linux `vhci-hcd` instance: 8 USB2 ports,
/// 8 USB3 ports, comfortably under the 127-port USB topology limit.
pub const USB2_PORTS: usize = 8;
pub const USB3_PORTS: usize = 8;

struct PortTable {
    slots: Vec<Option<Arc<VirtualDevice>>>,
}

impl PortTable {
    fn new(len: usize) -> Self {
        PortTable {
            slots: (0..len).map(|_| None).collect(),
        }
    }

    fn remember(&mut self, device: Arc<VirtualDevice>) -> Option<usize> {
        let slot = self.slots.iter().position(|s| s.is_none())?;
        self.slots[slot] = Some(device);
        Some(slot)
    }

    fn forget(&mut self, port: usize) -> Option<Arc<VirtualDevice>> {
        self.slots.get_mut(port)?.take()
    }

    fn find(&self, port: usize) -> Option<Arc<VirtualDevice>> {
        self.slots.get(port).and_then(|s| s.clone())
    }
}

/// The virtual host controller's hub: one fixed-size port table per
/// speed class, each port either empty or holding a reference to a live
/// [`VirtualDevice`] session.
pub struct VirtualHub {
    usb2: Mutex<PortTable>,
    usb3: Mutex<PortTable>,
}

impl Default for VirtualHub {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualHub {
    pub fn new() -> Self {
        VirtualHub {
            usb2: Mutex::new(PortTable::new(USB2_PORTS)),
            usb3: Mutex::new(PortTable::new(USB3_PORTS)),
        }
    }

    fn table(&self, class: SpeedClass) -> &Mutex<PortTable> {
        match class {
            SpeedClass::Usb2 => &self.usb2,
            SpeedClass::Usb3 => &self.usb3,
        }
    }

    /// Claims a free port of `device`'s speed class and attaches it.
    /// Returns the port number (unique within its speed class, per §6's
    /// port-uniqueness invariant), or an error if the class is full.
    pub fn remember(&self, device: Arc<VirtualDevice>) -> Result<usize, crate::error::SessionError> {
        let class = SpeedClass::of(device.speed().unwrap_or(Speed::Unknown));
        let mut table = self.table(class).lock().unwrap();
        table.remember(device).ok_or(crate::error::SessionError::PortFull(class))
    }

    /// Detaches whatever device occupies `port` of the given class,
    /// disconnecting it first so its registry is drained. Forgetting an
    /// already-empty port is a no-op (idempotent detach, §8).
    pub fn forget(&self, class: SpeedClass, port: usize) {
        let removed = self.table(class).lock().unwrap().forget(port);
        if let Some(device) = removed {
            device.disconnect();
        }
    }

    pub fn find(&self, class: SpeedClass, port: usize) -> Option<Arc<VirtualDevice>> {
        self.table(class).lock().unwrap().find(port)
    }

    /// Calls `f` with every occupied port's device, across both speed
    /// classes, snapshotting the occupied slots first so `f` can run
    /// without holding the port table lock (matching the teacher's
    /// pattern of never invoking driver callbacks under its own lock).
    pub fn for_each(&self, mut f: impl FnMut(SpeedClass, usize, &Arc<VirtualDevice>)) {
        for (class, table) in [(SpeedClass::Usb2, &self.usb2), (SpeedClass::Usb3, &self.usb3)] {
            let snapshot: Vec<(usize, Arc<VirtualDevice>)> = table
                .lock()
                .unwrap()
                .slots
                .iter()
                .enumerate()
                .filter_map(|(i, s)| s.clone().map(|d| (i, d)))
                .collect();
            for (port, device) in snapshot {
                f(class, port, &device);
            }
        }
    }

    /// Detaches every device on the hub, e.g. on driver shutdown.
    pub fn destroy_all(&self) {
        for class in [SpeedClass::Usb2, SpeedClass::Usb3] {
            let ports: Vec<usize> = {
                let table = self.table(class).lock().unwrap();
                table
                    .slots
                    .iter()
                    .enumerate()
                    .filter_map(|(i, s)| s.is_some().then_some(i))
                    .collect()
            };
            for port in ports {
                self.forget(class, port);
            }
        }
    }
}
