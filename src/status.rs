//! Status LED: a periodic toggle whose rate tells a human whether the node is online.

use std::time::Duration;

use log::debug;

use crate::config::{CONNECTED_BLINK_INTERVAL, DISCONNECTED_BLINK_INTERVAL};
use crate::network::ConnectivityState;

/// A two-level digital output. Driving it has no failure path the loop cares about.
pub trait StatusOutput {
    fn set_level(&mut self, high: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlinkState {
    pub last_toggle_ms: u64,
    pub level: bool,
}

pub struct StatusIndicator<O> {
    output: O,
    state: BlinkState,
}

impl<O: StatusOutput> StatusIndicator<O> {
    /// Starts low, with the toggle clock at zero.
    pub fn new(mut output: O) -> Self {
        output.set_level(false);
        Self {
            output,
            state: BlinkState::default(),
        }
    }

    /// Toggles the output when at least `interval` has passed since the last toggle.
    /// Returns whether it toggled.
    pub fn tick(&mut self, now_ms: u64, interval: Duration) -> bool {
        let interval_ms = interval.as_millis() as u64;
        if now_ms.saturating_sub(self.state.last_toggle_ms) < interval_ms {
            return false;
        }
        self.state.last_toggle_ms = now_ms;
        self.state.level = !self.state.level;
        self.output.set_level(self.state.level);
        debug!("[LED] level={}", self.state.level);
        true
    }

    pub fn state(&self) -> BlinkState {
        self.state
    }

    pub fn output(&self) -> &O {
        &self.output
    }
}

/// Fast blink while seeking a link, slow blink once connected.
pub fn blink_interval_for(state: ConnectivityState) -> Duration {
    match state {
        ConnectivityState::Disconnected => DISCONNECTED_BLINK_INTERVAL,
        ConnectivityState::Connected => CONNECTED_BLINK_INTERVAL,
    }
}
