//! strata-autoscale — target-tracking replica control.
//!
//! Keeps each workload's averaged utilization near a configured target
//! by resizing the live traffic target, with independent cooldown
//! clocks for scale-out and scale-in so a burst response never delays
//! a later shrink (or vice versa).

pub mod scaler;

pub use scaler::{AutoScaler, MetricsFn, Sample, ScaleCallback, ScaleDecision};
