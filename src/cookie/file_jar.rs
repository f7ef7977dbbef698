//! Cookie jar persisted as a JSON file.
//!
//! Lets separate OS processes share cookies the way browser tabs do:
//! - Reads take a shared file lock, writes an exclusive one, so each
//!   individual get/set is atomic
//! - Expired cookies are invisible and pruned on the next write
//! - An unreadable or corrupt file behaves like an empty jar

use super::{CookieJar, CookieOptions, StoredCookie};
use crate::clock::Clock;
use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CookieFile {
    #[serde(default)]
    cookies: BTreeMap<String, StoredCookie>,
}

pub struct FileCookieJar {
    path: PathBuf,
    clock: Rc<dyn Clock>,
}

impl FileCookieJar {
    pub fn new(path: impl Into<PathBuf>, clock: Rc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            clock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes every cookie from the file.
    pub fn clear_all(&self) -> Result<()> {
        self.update(|contents| contents.cookies.clear())
    }

    fn read(&self) -> Result<CookieFile> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(CookieFile::default()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to open cookie jar: {}", self.path.display()))
            }
        };

        file.lock_shared()
            .with_context(|| format!("Failed to lock cookie jar: {}", self.path.display()))?;
        let mut content = String::new();
        let read = file.read_to_string(&mut content);
        let _ = file.unlock();
        read.with_context(|| format!("Failed to read cookie jar: {}", self.path.display()))?;

        parse_contents(&content)
            .with_context(|| format!("Failed to parse cookie jar: {}", self.path.display()))
    }

    fn update(&self, apply: impl FnOnce(&mut CookieFile)) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create cookie jar directory: {}", parent.display())
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open cookie jar: {}", self.path.display()))?;

        file.lock_exclusive()
            .with_context(|| format!("Failed to lock cookie jar: {}", self.path.display()))?;
        let result = self.rewrite(&mut file, apply);
        let _ = file.unlock();
        result
    }

    fn rewrite(&self, file: &mut File, apply: impl FnOnce(&mut CookieFile)) -> Result<()> {
        let mut content = String::new();
        file.read_to_string(&mut content)
            .context("Failed to read cookie jar before write")?;
        let mut contents = parse_contents(&content).unwrap_or_else(|e| {
            tracing::warn!("Discarding corrupt cookie jar {}: {}", self.path.display(), e);
            CookieFile::default()
        });

        apply(&mut contents);
        let now = self.clock.now_ms();
        contents.cookies.retain(|_, cookie| cookie.is_live(now));

        let serialized =
            serde_json::to_string_pretty(&contents).context("Failed to serialize cookie jar")?;
        file.set_len(0).context("Failed to truncate cookie jar")?;
        file.seek(SeekFrom::Start(0))
            .context("Failed to rewind cookie jar")?;
        file.write_all(serialized.as_bytes())
            .context("Failed to write cookie jar")?;
        file.flush().context("Failed to flush cookie jar")?;
        Ok(())
    }
}

fn parse_contents(content: &str) -> Result<CookieFile> {
    if content.trim().is_empty() {
        return Ok(CookieFile::default());
    }
    Ok(serde_json::from_str(content)?)
}

impl CookieJar for FileCookieJar {
    fn get(&self, name: &str) -> Option<String> {
        match self.read() {
            Ok(contents) => {
                let now = self.clock.now_ms();
                contents
                    .cookies
                    .get(name)
                    .filter(|cookie| cookie.is_live(now))
                    .map(|cookie| cookie.value.clone())
            }
            Err(e) => {
                tracing::warn!("Cookie read failed, treating as absent: {:#}", e);
                None
            }
        }
    }

    fn set(&self, name: &str, value: &str, max_age_ms: u64, options: &CookieOptions) {
        let now = self.clock.now_ms();
        let result = self.update(|contents| {
            if max_age_ms == 0 || value.is_empty() {
                contents.cookies.remove(name);
            } else {
                contents.cookies.insert(
                    name.to_string(),
                    StoredCookie::new(value, now, max_age_ms, options),
                );
            }
        });
        if let Err(e) = result {
            tracing::warn!("Cookie write failed: {:#}", e);
        }
    }
}
