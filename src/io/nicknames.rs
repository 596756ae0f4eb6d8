//! Device directory: MBID → position, name and DOM id.
//!
//! The nicknames table is whitespace separated with one header line:
//!
//! ```text
//! mbid          domid     name          location
//! e9fed8c717dd  UP5P0970  Alpha_Centauri  21-30
//! ```
//!
//! Rows with fewer than four columns are skipped; a location that does not
//! parse as `SS-PP` leaves the position unset.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::debug;

use crate::domain::Position;
use crate::error::CalError;

pub const DEFAULT_NICKNAMES: &str = "ic86/nicknames.txt";

/// Lookup of device metadata by MBID.
pub trait DeviceDirectory {
    fn position(&self, mbid: &str) -> Option<Position>;
    fn name(&self, mbid: &str) -> Option<&str>;
    fn dom_id(&self, mbid: &str) -> Option<&str>;

    /// Resolve an MBID, name, `SS-PP` position or DOM id to an MBID.
    fn find_mbid(&self, query: &str) -> Option<String>;

    /// `SS-PP name` for diagnostics, with `?` for unknown parts.
    fn describe(&self, mbid: &str) -> String {
        let pos = self.position(mbid).map(|p| p.to_string()).unwrap_or_else(|| "??-??".into());
        format!("{pos} {}", self.name(mbid).unwrap_or("?"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub mbid: String,
    pub dom_id: String,
    pub name: String,
    pub position: Option<Position>,
}

#[derive(Debug, Clone, Default)]
pub struct Nicknames {
    entries: Vec<DeviceInfo>,
    index: HashMap<String, usize>,
}

impl Nicknames {
    pub fn load(path: &Path) -> Result<Self, CalError> {
        let file = File::open(path).map_err(|e| CalError::io(path, e))?;
        let nicks = Self::parse(BufReader::new(file)).map_err(|e| CalError::io(path, e))?;
        debug!(path = %path.display(), devices = nicks.len(), "loaded nicknames");
        Ok(nicks)
    }

    pub fn parse<R: BufRead>(reader: R) -> std::io::Result<Self> {
        let mut nicks = Self::default();
        for line in reader.lines().skip(1) {
            let line = line?;
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 4 {
                continue;
            }
            nicks.insert(DeviceInfo {
                mbid: cols[0].to_string(),
                dom_id: cols[1].to_string(),
                name: cols[2].to_string(),
                position: cols[3].parse().ok(),
            });
        }
        Ok(nicks)
    }

    /// Add or replace a device.
    pub fn insert(&mut self, info: DeviceInfo) {
        match self.index.get(&info.mbid) {
            Some(&i) => self.entries[i] = info,
            None => {
                self.index.insert(info.mbid.clone(), self.entries.len());
                self.entries.push(info);
            }
        }
    }

    pub fn get(&self, mbid: &str) -> Option<&DeviceInfo> {
        self.index.get(mbid).map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl DeviceDirectory for Nicknames {
    fn position(&self, mbid: &str) -> Option<Position> {
        self.get(mbid).and_then(|d| d.position)
    }

    fn name(&self, mbid: &str) -> Option<&str> {
        self.get(mbid).map(|d| d.name.as_str())
    }

    fn dom_id(&self, mbid: &str) -> Option<&str> {
        self.get(mbid).map(|d| d.dom_id.as_str())
    }

    fn find_mbid(&self, query: &str) -> Option<String> {
        if self.index.contains_key(query) {
            return Some(query.to_string());
        }
        self.entries
            .iter()
            .find(|d| {
                d.name == query || d.dom_id == query || d.position.is_some_and(|p| p.to_string() == query)
            })
            .map(|d| d.mbid.clone())
    }
}
