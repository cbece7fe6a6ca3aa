// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod cli;
pub mod logger;

pub use cli::{ClientArgs, LogFormat, ServerArgs};
pub use logger::init_tracing;
