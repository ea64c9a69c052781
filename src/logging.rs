// SPDX-License-Identifier: Apache-2.0

//! Log subscriber setup for binaries embedding the registry.

use std::io::IsTerminal;

use clap::ValueEnum;
use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::error::{Error, Result};

#[derive(Copy, Clone, Debug, Default, ValueEnum, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Install the global tracing subscriber.
///
/// The filter defaults to `info` and can be overridden with `RUST_LOG`.
/// Fails if a global subscriber is already installed.
pub fn init(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()
        .map_err(|e| Error::Config(format!("invalid log filter: {}", e)))?;

    let result = match format {
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_target(true);
            tracing::subscriber::set_global_default(Registry::default().with(filter).with(layer))
        }
        LogFormat::Text => {
            // Skip color codes when not in a terminal
            let layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_ansi(std::io::stdout().is_terminal())
                .compact();
            tracing::subscriber::set_global_default(Registry::default().with(filter).with(layer))
        }
    };

    result.map_err(|e| Error::Config(format!("failed to install log subscriber: {}", e)))
}
