#![allow(dead_code)]

use hvx::{
    HvError,
    hypervisor::{GuestPacket, Port},
};
use parking_lot::Mutex;

/// Installs a subscriber printing through the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// A port collecting every packet queued on it.
#[derive(Default)]
pub struct RecordingPort {
    packets: Mutex<Vec<GuestPacket>>,
}

impl RecordingPort {
    /// Removes and returns the packets queued so far.
    pub fn take(&self) -> Vec<GuestPacket> {
        std::mem::take(&mut *self.packets.lock())
    }
}

impl Port for RecordingPort {
    fn queue(&self, packet: GuestPacket) -> Result<(), HvError> {
        tracing::debug!(?packet, "packet queued");
        self.packets.lock().push(packet);
        Ok(())
    }
}
