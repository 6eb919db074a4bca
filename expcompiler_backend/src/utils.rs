use std::time::Instant;

use tracing::debug;

/// Utility class for time-tracking of streaming and compilation phases.
pub struct TickTimer {
    last: Instant,
}

impl Default for TickTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl TickTimer {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    /// Milliseconds since the previous tick (or construction).
    pub fn tick(&mut self) -> f64 {
        let now = Instant::now();
        let diff = now.duration_since(self.last).as_secs_f64() * 1e3;
        self.last = now;
        diff
    }

    pub fn tick_print(&mut self, msg: &str) -> f64 {
        let diff = self.tick();
        debug!("{}: {:.3} ms", msg, diff);
        diff
    }
}

/// Parses a digital line name of the form `port<N>/line<M>` into `(N, M)`.
pub fn extract_port_line_numbers(chan: &str) -> Option<(usize, usize)> {
    let (port_part, line_part) = chan.split_once('/')?;
    let port = extract_port_number(port_part)?;
    let line = line_part.strip_prefix("line")?.parse().ok()?;
    Some((port, line))
}

/// Parses a digital port name of the form `port<N>` into `N`.
pub fn extract_port_number(port: &str) -> Option<usize> {
    port.strip_prefix("port")?.parse().ok()
}
