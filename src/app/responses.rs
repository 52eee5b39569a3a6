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

use chrono::{DateTime, FixedOffset};
use serde::Serialize;

use crate::influx::{MetricRow, ScalarValue};

/// Rows map 1:1 onto records, keeping the store's order.
pub(crate) fn records_from_rows(rows: Vec<MetricRow>) -> Vec<MetricRecord> {
    rows.into_iter().map(MetricRecord::from).collect()
}

#[derive(Debug, Serialize)]
pub(crate) struct MetricRecord {
    time: DateTime<FixedOffset>,
    measurement: String,
    field: String,
    value: ScalarValue,
}

impl From<MetricRow> for MetricRecord {
    fn from(row: MetricRow) -> Self {
        Self {
            time: row.time,
            measurement: row.measurement,
            field: row.field,
            value: row.value,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AggregateResponse {
    pub(crate) value: ScalarValue,
}
