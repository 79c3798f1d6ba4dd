/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Calculates network jitter based on frame inter-arrival times.

use std::collections::VecDeque;

/// Number of samples kept in the sliding window.
const MAX_JITTER_SAMPLES: usize = 50;

/// Estimates network jitter from frame arrival times.
///
/// Each sample is the absolute deviation of one inter-arrival interval from
/// the nominal frame period; the estimate is the mean over a bounded window.
#[derive(Debug)]
pub struct JitterEstimator {
    // The nominal inter-frame period of the source, in seconds.
    nominal_interval: f64,
    samples: VecDeque<f64>,
    average: f64,
    // The arrival time of the previously processed frame.
    last_arrival: Option<f64>,
}

impl JitterEstimator {
    pub fn new(nominal_interval: f64) -> Self {
        Self {
            nominal_interval,
            samples: VecDeque::with_capacity(MAX_JITTER_SAMPLES),
            average: 0.0,
            last_arrival: None,
        }
    }

    /// Feed one frame arrival. The first arrival only seeds the window.
    pub fn on_arrival(&mut self, arrival: f64) {
        if let Some(last) = self.last_arrival {
            let deviation = ((arrival - last) - self.nominal_interval).abs();
            if self.samples.len() == MAX_JITTER_SAMPLES {
                self.samples.pop_front();
            }
            self.samples.push_back(deviation);
            self.average = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
        }
        self.last_arrival = Some(arrival);
    }

    /// Current average jitter in seconds.
    pub fn average(&self) -> f64 {
        self.average
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.average = 0.0;
        self.last_arrival = None;
    }
}
