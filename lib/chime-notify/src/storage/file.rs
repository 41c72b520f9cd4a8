// Copyright 2026 - developers of the `chime` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::StorageError;
use super::error::*;
use crate::context::CounterStore;
use log::warn;
use snafu::prelude::*;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

/// A [`CounterStore`] backed by a small `key=value` file.
///
/// The whole file is rewritten on every write. The entries are two short
/// counters, so durability wins over cleverness; a write failure is logged
/// and the in-memory value keeps serving reads.
pub struct FileCounterStore {
    inner: Mutex<Inner>,
}

struct Inner {
    file: File,
    entries: HashMap<String, String>,
}

impl FileCounterStore {
    /// Open `path`, creating the file if missing, and load any existing
    /// entries.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .context(UnexpectedIoSnafu)?;

        let mut content = String::new();
        file.read_to_string(&mut content)
            .context(UnexpectedIoSnafu)?;

        let mut entries = HashMap::new();
        for line in content.lines() {
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once('=').context(MalformedEntrySnafu { line })?;
            entries.insert(key.to_string(), value.to_string());
        }

        Ok(Self {
            inner: Mutex::new(Inner { file, entries }),
        })
    }
}

impl Inner {
    fn persist(&mut self) -> Result<(), StorageError> {
        let mut content = String::new();
        for (key, value) in &self.entries {
            content.push_str(key);
            content.push('=');
            content.push_str(value);
            content.push('\n');
        }

        self.file
            .seek(SeekFrom::Start(0))
            .context(UnexpectedIoSnafu)?;
        self.file.set_len(0).context(UnexpectedIoSnafu)?;
        self.file
            .write_all(content.as_bytes())
            .context(UnexpectedIoSnafu)?;
        self.file.sync_data().context(UnexpectedIoSnafu)
    }
}

impl CounterStore for FileCounterStore {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().unwrap().entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.insert(key.to_string(), value.to_string());
        if let Err(e) = inner.persist() {
            warn!("failed to persist counter {}: {}", key, e);
        }
    }
}
