// Update Throttle - change detection for the raw measurement stream
// Only a significant change against the last published measurement is passed on;
// dropped updates get a separately rate-limited diagnostic

use std::time::Duration;
use tokio::time::Instant;

use crate::Measurement;

/// Outcome of evaluating one measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleDecision {
    pub publish: bool,
    /// A dropped update may be logged now
    pub log_drop: bool,
}

/// Per-peer change-detection cache
#[derive(Debug, Clone)]
pub struct UpdateThrottle {
    distance_threshold: f32,
    /// Component threshold in unit-vector space
    direction_threshold: f32,
    log_interval: Duration,
    previous: Option<Measurement>,
    last_published_at: Option<Instant>,
    last_logged_at: Option<Instant>,
}

impl UpdateThrottle {
    pub fn new(distance_threshold: f32, direction_threshold_degrees: f32, log_interval: Duration) -> Self {
        Self {
            distance_threshold,
            // A per-component delta of two unit vectors never exceeds their
            // angle in radians, so the angle threshold maps directly.
            direction_threshold: direction_threshold_degrees.to_radians(),
            log_interval,
            previous: None,
            last_published_at: None,
            last_logged_at: None,
        }
    }

    /// Whether `measurement` differs enough from the last published one
    pub fn is_significant(&self, measurement: &Measurement) -> bool {
        let previous = match &self.previous {
            Some(previous) => previous,
            None => return true,
        };

        if (measurement.distance - previous.distance).abs() > self.distance_threshold {
            return true;
        }

        match (&previous.direction, &measurement.direction) {
            (Some(old), Some(new)) => {
                old.normalized().max_component_delta(&new.normalized()) > self.direction_threshold
            }
            (None, None) => false,
            // Direction appeared or vanished
            _ => true,
        }
    }

    /// Evaluate a measurement, recording it as published when significant
    pub fn evaluate(&mut self, measurement: &Measurement, now: Instant) -> ThrottleDecision {
        if self.is_significant(measurement) {
            self.previous = Some(measurement.clone());
            self.last_published_at = Some(now);
            return ThrottleDecision {
                publish: true,
                log_drop: false,
            };
        }

        let log_drop = match self.last_logged_at {
            Some(at) => now.duration_since(at) >= self.log_interval,
            None => true,
        };
        if log_drop {
            self.last_logged_at = Some(now);
        }

        ThrottleDecision {
            publish: false,
            log_drop,
        }
    }

    pub fn last_published(&self) -> Option<&Measurement> {
        self.previous.as_ref()
    }

    pub fn last_published_at(&self) -> Option<Instant> {
        self.last_published_at
    }

    pub fn reset(&mut self) {
        self.previous = None;
        self.last_published_at = None;
        self.last_logged_at = None;
    }
}
