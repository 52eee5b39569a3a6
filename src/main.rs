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

use std::net::SocketAddr;

use app::{AppConfig, AppState, router};
use clap::Parser;
use error::AppError;
use log::{LevelFilter, info};

mod app;
mod error;
mod flux;
mod influx;

#[derive(Debug, Parser)]
#[command(author, version, about, disable_help_subcommand = true)]
struct Args {
    /// InfluxDB base URL, e.g. http://localhost:8086
    #[arg(long, env = "INFLUXDB_URL", default_value = "http://localhost:8086")]
    url: String,
    /// API token used to authenticate against InfluxDB
    #[arg(long, env = "INFLUXDB_TOKEN", hide_env_values = true)]
    token: String,
    /// Organization owning the queried bucket
    #[arg(long, env = "INFLUXDB_ORG")]
    org: String,
    /// Bucket holding the metric points
    #[arg(long, env = "INFLUXDB_BUCKET")]
    bucket: String,
    /// HTTP bind address for the API server
    #[arg(long = "bind", env = "BIND_ADDR", default_value = "0.0.0.0:5000")]
    bind: SocketAddr,
    /// Measurement queried when a request does not name one
    #[arg(
        long = "default-measurement",
        env = "DEFAULT_MEASUREMENT",
        default_value = "system_metrics"
    )]
    default_measurement: String,
    /// Comma-separated metrics accepted by the aggregate endpoint; empty allows any
    #[arg(long = "allowed-metrics", env = "ALLOWED_METRICS", value_delimiter = ',')]
    allowed_metrics: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    init_logging();
    let args = Args::parse();
    info!(
        "starting influx-metrics-api (bucket={}, default_measurement={}, bind={})",
        args.bucket, args.default_measurement, args.bind
    );
    let config = AppConfig {
        url: args.url,
        token: args.token,
        org: args.org,
        bucket: args.bucket,
        default_measurement: args.default_measurement,
        allowed_metrics: args.allowed_metrics,
    };
    let state = AppState::bootstrap(config).await?;
    let app = router(state);

    info!("binding TCP listener on {}", args.bind);
    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind listener: {err}")))?;
    info!("influx-metrics-api listening on {}", args.bind);
    axum::serve(listener, app)
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;
    Ok(())
}

fn init_logging() {
    if std::env::var_os("RUST_LOG").is_some() {
        env_logger::Builder::from_default_env().init();
    } else {
        env_logger::Builder::new()
            .filter_level(LevelFilter::Warn)
            .filter_module("influx_metrics_api", LevelFilter::Info)
            .init();
    }
}
