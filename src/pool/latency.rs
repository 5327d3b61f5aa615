use std::time::{Duration, Instant};

/// Emulated persistent-memory access latency.
///
/// DRAM stands in for the real device, so slower media is modelled by
/// busy-waiting: every handle resolution pays `read`, every allocation,
/// free or undo record pays `write`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyModel {
    pub read: Duration,
    pub write: Duration,
}

impl LatencyModel {
    pub fn new(read: Duration, write: Duration) -> Self {
        Self { read, write }
    }

    pub fn is_disabled(&self) -> bool {
        self.read.is_zero() && self.write.is_zero()
    }

    pub fn on_read(&self) {
        spin_for(self.read);
    }

    pub fn on_write(&self) {
        spin_for(self.write);
    }
}

fn spin_for(delay: Duration) {
    if delay.is_zero() {
        return;
    }
    let deadline = Instant::now() + delay;
    while Instant::now() < deadline {
        std::hint::spin_loop();
    }
}
