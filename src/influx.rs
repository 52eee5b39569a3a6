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

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use influxdb2::{Client, FluxRecord, models::Query};
use influxdb2_structmap::{GenericMap, value::Value};
use serde::Serialize;

use crate::error::AppError;

/// Read-only seam to the time-series store. Handlers depend on this trait so
/// tests can stand in a store double without a live database.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    async fn query_rows(&self, flux: &str) -> Result<Vec<MetricRow>, AppError>;
}

pub struct InfluxStore {
    client: Client,
}

impl InfluxStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MetricsStore for InfluxStore {
    async fn query_rows(&self, flux: &str) -> Result<Vec<MetricRow>, AppError> {
        let query = Query::new(flux.to_string());
        let records = self.client.query_raw(Some(query)).await?;
        records.iter().map(row_from_record).collect()
    }
}

/// One decoded store row.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricRow {
    pub time: DateTime<FixedOffset>,
    pub measurement: String,
    pub field: String,
    pub value: ScalarValue,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Float(f64),
    Int(i64),
    UInt(u64),
    Bool(bool),
    Text(String),
}

impl ScalarValue {
    fn from_flux(value: &Value) -> Result<Self, AppError> {
        match value {
            Value::Double(inner) => Ok(Self::Float(inner.into_inner())),
            Value::Long(inner) => Ok(Self::Int(*inner)),
            Value::UnsignedLong(inner) => Ok(Self::UInt(*inner)),
            Value::Bool(inner) => Ok(Self::Bool(*inner)),
            Value::String(inner) => Ok(Self::Text(inner.clone())),
            other => Err(AppError::Internal(format!(
                "_value column has unexpected type: {other:?}"
            ))),
        }
    }
}

fn row_from_record(record: &FluxRecord) -> Result<MetricRow, AppError> {
    row_from_values(&record.values)
}

pub(crate) fn row_from_values(values: &GenericMap) -> Result<MetricRow, AppError> {
    let time = match values.get("_time") {
        Some(Value::TimeRFC(time)) => *time,
        Some(other) => {
            return Err(AppError::Internal(format!(
                "_time column has unexpected type: {other:?}"
            )));
        }
        None => {
            return Err(AppError::Internal(
                "query result is missing the _time column".into(),
            ));
        }
    };
    let measurement = string_column(values, "_measurement")?;
    let field = string_column(values, "_field")?;
    let value = values
        .get("_value")
        .ok_or_else(|| AppError::Internal("query result is missing the _value column".into()))
        .and_then(ScalarValue::from_flux)?;

    Ok(MetricRow {
        time,
        measurement,
        field,
        value,
    })
}

fn string_column(values: &GenericMap, column: &str) -> Result<String, AppError> {
    match values.get(column) {
        Some(Value::String(text)) => Ok(text.clone()),
        Some(other) => Err(AppError::Internal(format!(
            "{column} column has unexpected type: {other:?}"
        ))),
        None => Err(AppError::Internal(format!(
            "query result is missing the {column} column"
        ))),
    }
}
