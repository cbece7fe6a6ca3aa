// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Tracing initialization (§4.7): `EnvFilter` honors `RUST_LOG`, defaulting
//! to the CLI's `--log-level`. A deliberately lighter touch than a bespoke
//! JSON formatter — `tracing-subscriber`'s built-in JSON layer already
//! covers this protocol's structured-field needs.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::cfg::cli::LogFormat;

pub fn init_tracing(default_level: &str, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .context("building log filter")?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}
