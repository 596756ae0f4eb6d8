//! A loadable, savable configuration document.
//!
//! `ConfigNode` owns the parsed element tree, where it came from, and a
//! `modified` flag. The flag is only ever set by mutating helpers in
//! `DeviceConfig` / `ConfigurationTreeStore`; saving clears it.
//!
//! Comments and processing instructions around the root element are kept and
//! written back in place, as are comments and whitespace inside the tree.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use tracing::debug;
use xmltree::{Element, XMLNode};

use crate::error::CalError;
use crate::io::xml::{emitter_config, parser_config};

const DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

#[derive(Debug, Clone)]
pub struct ConfigNode {
    dir: PathBuf,
    filename: String,
    prolog: Vec<XMLNode>,
    root: Element,
    epilog: Vec<XMLNode>,
    modified: bool,
}

impl ConfigNode {
    pub fn load(path: &Path) -> Result<Self, CalError> {
        let file = File::open(path).map_err(|e| CalError::io(path, e))?;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| CalError::malformed(path, "not a file name"))?
            .to_string();
        Self::parse(dir, filename, BufReader::new(file))
    }

    /// Parse a document that will be saved as `dir/filename`.
    pub fn parse<R: Read>(dir: impl Into<PathBuf>, filename: impl Into<String>, reader: R) -> Result<Self, CalError> {
        let dir = dir.into();
        let filename = filename.into();
        let nodes = Element::parse_all_with_config(reader, parser_config())
            .map_err(|e| CalError::malformed(dir.join(&filename), e.to_string()))?;

        let mut prolog = Vec::new();
        let mut epilog = Vec::new();
        let mut root = None;
        for node in nodes {
            match node {
                XMLNode::Element(el) if root.is_none() => root = Some(el),
                XMLNode::Comment(_) | XMLNode::ProcessingInstruction(..) => {
                    if root.is_none() {
                        prolog.push(node);
                    } else {
                        epilog.push(node);
                    }
                }
                _ => {}
            }
        }
        let root = root.ok_or_else(|| CalError::malformed(dir.join(&filename), "no root element"))?;

        Ok(Self {
            dir,
            filename,
            prolog,
            root,
            epilog,
            modified: false,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.filename)
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    /// Mutable access to the tree. Callers that change it must also call
    /// `mark_modified`.
    pub fn root_mut(&mut self) -> &mut Element {
        &mut self.root
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn mark_modified(&mut self) {
        self.modified = true;
    }

    /// Serialize the document.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CalError> {
        let mut out = Vec::new();
        out.extend_from_slice(DECLARATION.as_bytes());
        out.push(b'\n');
        for node in &self.prolog {
            write_misc(&mut out, node);
            out.push(b'\n');
        }
        self.root
            .write_with_config(&mut out, emitter_config())
            .map_err(|e| CalError::malformed(self.path(), e.to_string()))?;
        out.push(b'\n');
        for node in &self.epilog {
            write_misc(&mut out, node);
            out.push(b'\n');
        }
        Ok(out)
    }

    /// Write the document to its directory.
    ///
    /// With `filename` the document is saved under that name and adopts it;
    /// otherwise it overwrites its current file. Clears `modified`.
    pub fn save(&mut self, filename: Option<&str>) -> Result<PathBuf, CalError> {
        if let Some(name) = filename {
            self.filename = name.to_string();
        }
        let path = self.path();
        let bytes = self.to_bytes()?;
        fs::write(&path, bytes).map_err(|e| CalError::io(&path, e))?;
        self.modified = false;
        debug!(path = %path.display(), "wrote configuration document");
        Ok(path)
    }
}

fn write_misc(out: &mut Vec<u8>, node: &XMLNode) {
    match node {
        XMLNode::Comment(text) => {
            out.extend_from_slice(b"<!--");
            out.extend_from_slice(text.as_bytes());
            out.extend_from_slice(b"-->");
        }
        XMLNode::ProcessingInstruction(target, data) => {
            out.extend_from_slice(b"<?");
            out.extend_from_slice(target.as_bytes());
            if let Some(data) = data {
                out.push(b' ');
                out.extend_from_slice(data.as_bytes());
            }
            out.extend_from_slice(b"?>");
        }
        _ => {}
    }
}
