//! Event-based call timing for tracing.
//!
//! When enabled, timed driver calls are bracketed by a start/end event pair
//! recorded on the default stream; the end event is synchronized and the
//! elapsed GPU time is logged. Instrumentation failures are logged and never
//! change the outcome of the timed call.

use std::time::Instant;

use crate::driver::{DeviceDriver, EventHandle};
use crate::error::Result;

/// Start/end event pair used to time driver calls.
#[derive(Debug, Default)]
pub struct CallTimer {
    enabled: bool,
    events: Option<(EventHandle, EventHandle)>,
    /// Host-side reference point for log timestamps.
    origin: Option<Instant>,
}

impl CallTimer {
    /// Create a timer. A disabled timer never touches the driver.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            events: None,
            origin: None,
        }
    }

    /// Whether timing was requested.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the event pair exists.
    pub fn is_armed(&self) -> bool {
        self.events.is_some()
    }

    /// Create the event pair if timing is enabled and it does not exist yet.
    pub fn arm<D: DeviceDriver + ?Sized>(&mut self, driver: &D) {
        if !self.enabled || self.events.is_some() {
            return;
        }

        let start = match driver.event_create() {
            Ok(event) => event,
            Err(status) => {
                tracing::warn!(%status, "failed to create timing event, timing disabled");
                return;
            }
        };
        match driver.event_create() {
            Ok(end) => {
                self.events = Some((start, end));
                self.origin = Some(Instant::now());
            }
            Err(status) => {
                tracing::warn!(%status, "failed to create timing event, timing disabled");
                let _ = driver.event_destroy(start);
            }
        }
    }

    /// Destroy the event pair. Errors are ignored; this runs during teardown.
    pub fn disarm<D: DeviceDriver + ?Sized>(&mut self, driver: &D) {
        if let Some((start, end)) = self.events.take() {
            let _ = driver.event_destroy(start);
            let _ = driver.event_destroy(end);
        }
        self.origin = None;
    }

    /// Run `call`, timing it if the event pair exists.
    pub fn time<D, T>(&self, driver: &D, label: &str, call: impl FnOnce() -> Result<T>) -> Result<T>
    where
        D: DeviceDriver + ?Sized,
    {
        let Some((start, end)) = self.events else {
            return call();
        };

        if let Err(status) = driver.event_record(start) {
            tracing::trace!(%status, label, "timing start event not recorded");
        }
        let result = call();
        let elapsed = driver
            .event_record(end)
            .and_then(|_| driver.event_synchronize(end))
            .and_then(|_| driver.event_elapsed_ms(start, end));

        match elapsed {
            Ok(msec) => {
                let since_origin_ns = self
                    .origin
                    .map(|o| o.elapsed().as_nanos() as u64)
                    .unwrap_or_default();
                tracing::debug!(label, msec, t = since_origin_ns, "timed driver call");
            }
            Err(status) => tracing::trace!(%status, label, "timing unavailable"),
        }
        result
    }
}
