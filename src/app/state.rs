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

use std::sync::Arc;

use influxdb2::Client;
use log::{info, warn};
use url::Url;

use crate::{
    error::AppError,
    influx::{InfluxStore, MetricsStore},
};

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn MetricsStore>,
    bucket: String,
    defaults: QueryDefaults,
    allowed_metrics: Vec<String>,
}

impl AppState {
    pub async fn bootstrap(config: AppConfig) -> Result<Self, AppError> {
        let AppConfig {
            url,
            token,
            org,
            bucket,
            default_measurement,
            allowed_metrics,
        } = config;
        let endpoint = Url::parse(&url)
            .map_err(|err| AppError::Internal(format!("invalid InfluxDB URL `{url}`: {err}")))?;
        info!("using InfluxDB at {endpoint} (org={org}, bucket={bucket})");
        let client = Client::new(url, org, token);
        probe_store(&client).await;
        Ok(Self {
            store: Arc::new(InfluxStore::new(client)),
            bucket,
            defaults: QueryDefaults {
                measurement: default_measurement,
                ..QueryDefaults::default()
            },
            allowed_metrics,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_store(
        store: Arc<dyn MetricsStore>,
        bucket: &str,
        allowed_metrics: Vec<String>,
    ) -> Self {
        Self {
            store,
            bucket: bucket.to_string(),
            defaults: QueryDefaults::default(),
            allowed_metrics,
        }
    }

    pub fn store(&self) -> &dyn MetricsStore {
        self.store.as_ref()
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn defaults(&self) -> &QueryDefaults {
        &self.defaults
    }

    /// An empty allow-list accepts any metric name.
    pub fn metric_allowed(&self, metric: &str) -> bool {
        self.allowed_metrics.is_empty() || self.allowed_metrics.iter().any(|name| name == metric)
    }
}

pub struct AppConfig {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
    pub default_measurement: String,
    pub allowed_metrics: Vec<String>,
}

/// Recognized query parameters and the values applied when a request omits
/// them.
#[derive(Clone, Debug)]
pub struct QueryDefaults {
    pub measurement: String,
    pub start_minutes: i64,
    pub end_minutes: i64,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            measurement: "system_metrics".to_string(),
            start_minutes: 1,
            end_minutes: 0,
        }
    }
}

// Startup probe only; a store that is down here still gets the server up,
// each request surfaces its own failure.
async fn probe_store(client: &Client) {
    match client.health().await {
        Ok(_) => info!("InfluxDB health check passed"),
        Err(err) => warn!("InfluxDB health check failed, queries will fail until the store is reachable: {err}"),
    }
}
