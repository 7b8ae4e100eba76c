// Spyglass
// Copyright (c) 2026 The Project Spyglass Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `guestlog` module maintains the agent's on-disk log file.
//!
//! The log is a wire artifact, not process diagnostics: the `logf` command exports it verbatim,
//! so its line format is fixed. The writer only ever appends; exports run over an independent
//! read handle on the same path so the append cursor is never disturbed.

use std::env;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Datelike, Local, Timelike};

use spyglass_core::errors::{resource_error, Result};

/// File name of the agent log when no override is given.
pub const DEFAULT_LOG_NAME: &str = "agent_log.txt";

/// The agent's append-only log file.
pub struct AgentLog {
    file: File,
    path: PathBuf,
}

impl AgentLog {
    /// Create (truncating) the log file, shared for reading.
    pub fn create(path: Option<PathBuf>) -> Result<AgentLog> {
        let path = path.unwrap_or_else(default_log_path);

        let file = match OpenOptions::new().write(true).create(true).truncate(true).open(&path) {
            Ok(file) => file,
            Err(_) => return resource_error("agent: unable to create the agent log file"),
        };

        Ok(AgentLog { file, path })
    }

    /// Append one timestamped line. Losing the log file is fatal for the session.
    pub fn write_line(&mut self, message: &str) -> Result<()> {
        let now = Local::now();

        let line = format!(
            "[ {}/{} {:02}:{:02} ]   {}\r\n",
            now.month(),
            now.day(),
            now.hour(),
            now.minute(),
            message
        );

        if self.file.write_all(line.as_bytes()).is_err() || self.file.flush().is_err() {
            return resource_error("agent: the agent log file was lost");
        }

        Ok(())
    }

    /// Open an independent read cursor on the live log for export.
    pub fn reader(&self) -> std::io::Result<File> {
        File::open(&self.path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The user's home (or profile) directory, with the temporary directory as a last resort.
fn default_log_path() -> PathBuf {
    let var = if cfg!(windows) { "USERPROFILE" } else { "HOME" };

    let mut path = env::var_os(var).map(PathBuf::from).unwrap_or_else(env::temp_dir);
    path.push(DEFAULT_LOG_NAME);
    path
}
