//! Known participants, loaded from a plain text file.
//!
//! One entry per line. `|` separates aliases for the same person and a
//! trailing `^` marks the line as an admin. Names are compared after
//! [`clean_name`].

use crate::error::SessionError;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;
use tracing::{debug, info};

/// Normalize a display name for allow-list comparison.
///
/// Lower-cases, drops periods, collapses whitespace, and strips a trailing
/// role tag such as `(Usher)` or `(DL)`.
pub fn clean_name(name: &str) -> String {
    static WS: OnceLock<Regex> = OnceLock::new();
    static TAG: OnceLock<Regex> = OnceLock::new();
    let ws = WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));
    let tag = TAG.get_or_init(|| {
        Regex::new(r"(?i)\s*\((?:Usher|DL|Chair|Speaker)\)\s*$").expect("role tag pattern is valid")
    });

    let lowered = name.to_lowercase().replace('.', "");
    let collapsed = ws.replace_all(&lowered, " ");
    tag.replace(&collapsed, "").trim().to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    entries: HashMap<String, bool>,
}

impl AllowList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Self {
        let mut entries: HashMap<String, bool> = HashMap::new();
        for line in text.lines() {
            let mut line = line.trim();
            if line.is_empty() {
                continue;
            }
            let is_admin = match line.strip_suffix('^') {
                Some(rest) => {
                    line = rest;
                    true
                }
                None => false,
            };
            for alias in line.split('|') {
                let name = clean_name(alias);
                if name.is_empty() {
                    continue;
                }
                *entries.entry(name).or_insert(false) |= is_admin;
            }
        }
        Self { entries }
    }

    /// `Some(is_admin)` for a known name, `None` otherwise.
    pub fn lookup(&self, name: &str) -> Option<bool> {
        self.entries.get(&clean_name(name)).copied()
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    pub fn is_admin(&self, name: &str) -> bool {
        self.lookup(name).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An [`AllowList`] backed by a file, re-read when its mtime changes.
#[derive(Debug)]
pub struct AllowListFile {
    path: PathBuf,
    modified: Option<SystemTime>,
    list: AllowList,
}

impl AllowListFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            modified: None,
            list: AllowList::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn list(&self) -> &AllowList {
        &self.list
    }

    /// Point at a different file; the next reload reads it.
    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if path != self.path {
            self.path = path;
            self.modified = None;
        }
    }

    /// Reload if the file changed. A missing file leaves an empty list.
    /// Returns true when the list was (re)loaded.
    pub fn reload_if_changed(&mut self) -> Result<bool, SessionError> {
        let modified = match std::fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(t) => Some(t),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if self.modified.is_some() || !self.list.is_empty() {
                    info!(path = %self.path.display(), "allow-list removed, clearing");
                    self.list = AllowList::new();
                    self.modified = None;
                    return Ok(true);
                }
                debug!(path = %self.path.display(), "no allow-list file");
                return Ok(false);
            }
            Err(source) => {
                return Err(SessionError::AllowList {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if modified.is_some() && modified == self.modified {
            return Ok(false);
        }

        let text = std::fs::read_to_string(&self.path).map_err(|source| SessionError::AllowList {
            path: self.path.clone(),
            source,
        })?;
        self.list = AllowList::parse(&text);
        self.modified = modified;
        info!(path = %self.path.display(), entries = self.list.len(), "loaded allow-list");
        Ok(true)
    }
}
