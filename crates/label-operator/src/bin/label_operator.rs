/*
 * 5D Labs Agent Platform - Namespace Label Operator
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Namespace Label Operator - Kubernetes controller for `NamespaceLabel` CRDs
//!
//! This service:
//! - Watches `NamespaceLabel` resources, their namespaces and prefix records
//! - Merges every `NamespaceLabel` of a namespace into its labels
//! - Retracts labels before a `NamespaceLabel` is allowed to disappear
//! - Provides health endpoints

use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use axum::{response::Json, routing::get, Router};
use clap::{Parser, ValueEnum};
use kube::CustomResourceExt;
use label_operator::tasks::run_label_controller;
use label_operator::{ControllerConfig, NamespaceLabel};
use serde_json::{json, Value};
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Converge namespace labels from `NamespaceLabel` resources.
#[derive(Parser, Debug)]
#[command(name = "label-operator", version, about)]
struct Cli {
    /// Path to the mounted controller configuration.
    #[arg(long, env = "LABEL_OPERATOR_CONFIG", default_value = "/config/config.yaml")]
    config: String,

    /// Address for the health endpoints.
    #[arg(long, env = "LABEL_OPERATOR_HTTP_ADDR", default_value = "0.0.0.0:8080")]
    http_addr: String,

    /// Log output format.
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Print the NamespaceLabel CRD as YAML and exit.
    #[arg(long)]
    print_crd: bool,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn load_controller_config(config_path: &str) -> anyhow::Result<ControllerConfig> {
    let config = if Path::new(config_path).exists() {
        let cfg = ControllerConfig::from_mounted_file(config_path)?;
        info!("Loaded controller configuration from {}", config_path);
        cfg
    } else {
        warn!("No configuration at {}, using defaults", config_path);
        ControllerConfig::default()
    };

    config
        .validate()
        .context("controller configuration is invalid")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.print_crd {
        print!("{}", serde_yaml::to_string(&NamespaceLabel::crd())?);
        return Ok(());
    }

    init_tracing(cli.log_format);
    info!(
        "Starting Namespace Label Operator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = load_controller_config(&cli.config)?;

    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let controller_handle = tokio::spawn(async move {
        if let Err(e) = run_label_controller(client, config).await {
            error!("Controller error: {}", e);
        }
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                        .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
                )
                .layer(TimeoutLayer::new(Duration::from_secs(10))),
        );

    let listener = tokio::net::TcpListener::bind(&cli.http_addr).await?;
    info!("Health server listening on {}", cli.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The controller stops on the same signals via shutdown_on_signal
    if let Err(e) = controller_handle.await {
        error!("Controller task join error: {:?}", e);
    }
    info!("Namespace Label Operator stopped");

    Ok(())
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "label-operator",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check() -> Json<Value> {
    Json(json!({
        "status": "ready",
        "service": "label-operator",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
