//! The two run-configuration layouts.
//!
//! Old layout:
//!
//! ```text
//! <domConfigList hub="1">sps-01i-config</domConfigList>
//! ```
//!
//! New layout:
//!
//! ```text
//! <stringHub hubId="1" domConfig="sps-01i-config"/>
//! ```
//!
//! In both cases the child document is `domconfigs/<name>.xml` next to the run
//! configuration. Everything else about loading and saving is shared.

use std::fmt;

use xmltree::Element;

use crate::io::xml::{attr, set_text, trimmed_text};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutMode {
    Old,
    New,
}

impl LayoutMode {
    /// Tag of the per-hub reference element.
    pub fn hub_tag(self) -> &'static str {
        match self {
            LayoutMode::Old => "domConfigList",
            LayoutMode::New => "stringHub",
        }
    }

    /// Attribute carrying the hub id.
    pub fn hub_id_attr(self) -> &'static str {
        match self {
            LayoutMode::Old => "hub",
            LayoutMode::New => "hubId",
        }
    }

    pub fn hub_id(self, entry: &Element) -> Option<&str> {
        attr(entry, self.hub_id_attr())
    }

    /// Child document base name (no directory, no `.xml`).
    pub fn child_name(self, entry: &Element) -> Option<String> {
        match self {
            LayoutMode::Old => trimmed_text(entry).filter(|t| !t.is_empty()),
            LayoutMode::New => attr(entry, "domConfig").map(str::to_string),
        }
    }

    pub fn set_child_name(self, entry: &mut Element, name: &str) {
        match self {
            LayoutMode::Old => set_text(entry, name),
            LayoutMode::New => {
                entry.attributes.insert("domConfig".to_string(), name.to_string());
            }
        }
    }

    pub fn other(self) -> Self {
        match self {
            LayoutMode::Old => LayoutMode::New,
            LayoutMode::New => LayoutMode::Old,
        }
    }
}

impl fmt::Display for LayoutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutMode::Old => write!(f, "old"),
            LayoutMode::New => write!(f, "new"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::xml::parser_config;

    fn el(xml: &str) -> Element {
        Element::parse_with_config(xml.as_bytes(), parser_config()).unwrap()
    }

    #[test]
    fn old_layout_uses_text() {
        let mut e = el(r#"<domConfigList hub="3"> sps-03i </domConfigList>"#);
        assert_eq!(LayoutMode::Old.hub_id(&e), Some("3"));
        assert_eq!(LayoutMode::Old.child_name(&e).as_deref(), Some("sps-03i"));
        LayoutMode::Old.set_child_name(&mut e, "renamed");
        assert_eq!(LayoutMode::Old.child_name(&e).as_deref(), Some("renamed"));
        assert_eq!(LayoutMode::New.hub_id(&e), None);
    }

    #[test]
    fn new_layout_uses_attribute() {
        let mut e = el(r#"<stringHub hubId="201" domConfig="sps-01t"/>"#);
        assert_eq!(LayoutMode::New.hub_id(&e), Some("201"));
        assert_eq!(LayoutMode::New.child_name(&e).as_deref(), Some("sps-01t"));
        LayoutMode::New.set_child_name(&mut e, "renamed");
        assert_eq!(attr(&e, "domConfig"), Some("renamed"));
        assert_eq!(LayoutMode::New.other(), LayoutMode::Old);
    }
}
