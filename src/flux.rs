// Copyright 2021 Datafuse Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::error::AppError;

/// Relative time range in whole minutes before now; `start` is the older
/// boundary. A zero-width window (`start == end`) is accepted and passed
/// through to the store unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeWindow {
    start_minutes: i64,
    end_minutes: i64,
}

impl TimeWindow {
    pub fn new(start_minutes: i64, end_minutes: i64) -> Result<Self, AppError> {
        if start_minutes < 0 {
            return Err(AppError::InvalidParameter(format!(
                "start must be a non-negative number of minutes, got {start_minutes}"
            )));
        }
        if end_minutes < 0 {
            return Err(AppError::InvalidParameter(format!(
                "end must be a non-negative number of minutes, got {end_minutes}"
            )));
        }
        if start_minutes < end_minutes {
            return Err(AppError::InvalidWindow(format!(
                "start value ({start_minutes}) should not be smaller than end value ({end_minutes})"
            )));
        }
        Ok(Self {
            start_minutes,
            end_minutes,
        })
    }

    pub fn start_minutes(&self) -> i64 {
        self.start_minutes
    }

    pub fn end_minutes(&self) -> i64 {
        self.end_minutes
    }
}

/// All points of one measurement inside the window, in store order.
pub fn list_query(bucket: &str, measurement: &str, window: &TimeWindow) -> String {
    format!(
        "from(bucket: \"{}\") |> range(start: -{}m, stop: -{}m) |> filter(fn: (r) => r[\"_measurement\"] == \"{}\")",
        escape(bucket),
        window.start_minutes,
        window.end_minutes,
        escape(measurement)
    )
}

/// Arithmetic mean of one field over the window; `mean()` collapses the
/// range to a single row per series.
pub fn mean_query(bucket: &str, measurement: &str, field: &str, window: &TimeWindow) -> String {
    format!(
        "{} |> filter(fn: (r) => r[\"_field\"] == \"{}\") |> mean()",
        list_query(bucket, measurement, window),
        escape(field)
    )
}

// User-supplied names are only ever interpolated as Flux string literals,
// and only through here.
fn escape(input: &str) -> String {
    input.replace('\\', "\\\\").replace('"', "\\\"")
}
