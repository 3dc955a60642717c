//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Flat append-only line spool
//!
//! Records received while downstream consumers are unavailable land here,
//! one line per record. This is the full extent of persistence: a flat
//! file, appended to, drained for replay.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Append-only line spool backed by a flat file
pub struct Spool {
    path: PathBuf,
    file: Mutex<Option<File>>,
    appended: AtomicU64,
}

impl Spool {
    /// Create a spool over the given file path; the file is opened lazily
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
            appended: AtomicU64::new(0),
        }
    }

    /// The spool's backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines appended through this instance
    pub fn appended(&self) -> u64 {
        self.appended.load(Ordering::Relaxed)
    }

    /// Append one record, flushed to the file before returning
    pub async fn append(&self, line: &str) -> io::Result<()> {
        let mut guard = self.file.lock().await;
        if guard.is_none() {
            debug!(path = %self.path.display(), "opening spool");
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            *guard = Some(file);
        }
        let Some(file) = guard.as_mut() else {
            return Err(io::Error::other("spool file unavailable"));
        };
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        self.appended.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Take every spooled record for replay, leaving the file empty
    pub async fn drain(&self) -> io::Result<Vec<String>> {
        let mut guard = self.file.lock().await;
        guard.take();

        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error),
        };
        tokio::fs::write(&self.path, b"").await?;

        Ok(text.lines().map(str::to_string).collect())
    }
}

impl std::fmt::Debug for Spool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spool")
            .field("path", &self.path)
            .field("appended", &self.appended())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_spool(tag: &str) -> Spool {
        let path = std::env::temp_dir().join(format!(
            "portway-spool-{}-{tag}.log",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        Spool::new(path)
    }

    #[tokio::test]
    async fn test_append_and_drain_in_order() {
        let spool = temp_spool("order");

        spool.append("first").await.unwrap();
        spool.append("second").await.unwrap();
        spool.append("third").await.unwrap();
        assert_eq!(spool.appended(), 3);

        let drained = spool.drain().await.unwrap();
        assert_eq!(drained, vec!["first", "second", "third"]);

        // Drained spool is empty
        assert!(spool.drain().await.unwrap().is_empty());

        let _ = std::fs::remove_file(spool.path());
    }

    #[tokio::test]
    async fn test_drain_missing_file_is_empty() {
        let spool = temp_spool("missing");
        assert!(spool.drain().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_reopens_after_drain() {
        let spool = temp_spool("reopen");

        spool.append("before").await.unwrap();
        assert_eq!(spool.drain().await.unwrap(), vec!["before"]);

        spool.append("after").await.unwrap();
        assert_eq!(spool.drain().await.unwrap(), vec!["after"]);

        let _ = std::fs::remove_file(spool.path());
    }
}
