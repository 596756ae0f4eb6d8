//! Per-hub device configuration documents.
//!
//! A device document holds one `<domConfig mbid="...">` entry per device. Each
//! entry carries its settings as leaf elements (`pmtHighVoltage`,
//! `speTriggerDiscriminator`, ...) and its baselines under
//! `pedestalSettings/averagePedestal[atwd=A|B, ch=0..2]`.

use std::path::Path;
use std::str::FromStr;

use tracing::debug;
use xmltree::{Element, XMLNode};

use crate::domain::{ATWD_CHANNELS, BaselineMatrix, Chip};
use crate::error::CalError;
use crate::io::xml::{attr, child_elements, child_elements_mut, first_child, first_child_mut, set_text, trimmed_text};
use crate::runconfig::node::ConfigNode;

pub const DEVICE_TAG: &str = "domConfig";
pub const BASELINE_PARENT: &str = "pedestalSettings";
pub const BASELINE_TAG: &str = "averagePedestal";

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    node: ConfigNode,
}

impl DeviceConfig {
    pub fn load(path: &Path) -> Result<Self, CalError> {
        ConfigNode::load(path).map(Self::from_node)
    }

    pub fn from_node(node: ConfigNode) -> Self {
        Self { node }
    }

    pub fn node(&self) -> &ConfigNode {
        &self.node
    }

    pub fn node_mut(&mut self) -> &mut ConfigNode {
        &mut self.node
    }

    pub fn is_modified(&self) -> bool {
        self.node.is_modified()
    }

    /// MBIDs of all entries, in document order.
    pub fn mbids(&self) -> Vec<String> {
        self.entries().filter_map(|e| attr(e, "mbid")).map(str::to_string).collect()
    }

    pub fn len(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, mbid: &str) -> bool {
        self.entry(mbid).is_some()
    }

    /// Trimmed text of `field` for the first entry with this MBID.
    pub fn get(&self, mbid: &str, field: &str) -> Option<String> {
        self.entry(mbid).and_then(|e| first_child(e, field)).and_then(trimmed_text)
    }

    /// `get` parsed into `T`.
    pub fn setting<T: FromStr>(&self, mbid: &str, field: &str) -> Result<T, CalError> {
        let raw = self
            .get(mbid, field)
            .ok_or_else(|| CalError::not_found("setting", format!("{mbid}/{field}")))?;
        raw.parse()
            .map_err(|_| CalError::malformed(self.node.path(), format!("{mbid}/{field}: bad value '{raw}'")))
    }

    /// Set `field` on every entry with this MBID.
    pub fn set(&mut self, mbid: &str, field: &str, value: impl ToString) -> Result<(), CalError> {
        let value = value.to_string();
        let mut updated = 0usize;
        for entry in entries_mut(self.node.root_mut()).filter(|e| attr(e, "mbid") == Some(mbid)) {
            if let Some(leaf) = first_child_mut(entry, field) {
                set_text(leaf, &value);
                updated += 1;
            }
        }
        if updated == 0 {
            return Err(CalError::not_found("setting", format!("{mbid}/{field}")));
        }
        self.node.mark_modified();
        debug!(mbid, field, value = %value, "setting updated");
        Ok(())
    }

    /// Baselines of the first entry with this MBID.
    ///
    /// Entries not present in the document read as 0.
    pub fn baselines(&self, mbid: &str) -> Result<BaselineMatrix, CalError> {
        let pedestals = self
            .entry(mbid)
            .ok_or_else(|| CalError::not_found("device", mbid))?;
        let pedestals = first_child(pedestals, BASELINE_PARENT)
            .ok_or_else(|| CalError::not_found("baseline settings", mbid))?;

        let mut out = BaselineMatrix::zeros();
        for pedestal in child_elements(pedestals).filter(|e| e.name == BASELINE_TAG) {
            let (chip, ch) = self.pedestal_slot(mbid, pedestal)?;
            let raw = trimmed_text(pedestal).unwrap_or_default();
            out[(chip.index(), ch)] = raw.parse().map_err(|_| {
                CalError::malformed(self.node.path(), format!("{mbid}: baseline '{raw}' is not an integer"))
            })?;
        }
        Ok(out)
    }

    /// Replace the baselines of the first entry with this MBID.
    ///
    /// All pedestal entries are validated before any is written.
    pub fn set_baselines(&mut self, mbid: &str, values: &BaselineMatrix) -> Result<(), CalError> {
        let slots = {
            let entry = self.entry(mbid).ok_or_else(|| CalError::not_found("device", mbid))?;
            let pedestals = first_child(entry, BASELINE_PARENT)
                .ok_or_else(|| CalError::not_found("baseline settings", mbid))?;
            child_elements(pedestals)
                .filter(|e| e.name == BASELINE_TAG)
                .map(|p| self.pedestal_slot(mbid, p))
                .collect::<Result<Vec<_>, _>>()?
        };

        let entry = entries_mut(self.node.root_mut())
            .find(|e| attr(e, "mbid") == Some(mbid))
            .and_then(|e| first_child_mut(e, BASELINE_PARENT))
            .ok_or_else(|| CalError::not_found("baseline settings", mbid))?;
        let pedestals = child_elements_mut(entry).filter(|e| e.name == BASELINE_TAG);
        for (pedestal, (chip, ch)) in pedestals.zip(slots) {
            set_text(pedestal, &values[(chip.index(), ch)].to_string());
        }
        self.node.mark_modified();
        debug!(mbid, "baselines updated");
        Ok(())
    }

    /// Remove the first entry with this MBID. Returns whether one was found.
    pub fn remove(&mut self, mbid: &str) -> bool {
        let root = self.node.root_mut();
        let position = root.children.iter().position(|node| match node {
            XMLNode::Element(e) => e.name == DEVICE_TAG && attr(e, "mbid") == Some(mbid),
            _ => false,
        });
        match position {
            Some(index) => {
                root.children.remove(index);
                self.node.mark_modified();
                true
            }
            None => false,
        }
    }

    pub fn save(&mut self, filename: Option<&str>) -> Result<std::path::PathBuf, CalError> {
        self.node.save(filename)
    }

    fn entries(&self) -> impl Iterator<Item = &Element> {
        child_elements(self.node.root()).filter(|e| e.name == DEVICE_TAG)
    }

    fn entry(&self, mbid: &str) -> Option<&Element> {
        self.entries().find(|e| attr(e, "mbid") == Some(mbid))
    }

    fn pedestal_slot(&self, mbid: &str, pedestal: &Element) -> Result<(Chip, usize), CalError> {
        let chip = Chip::from_letter(attr(pedestal, "atwd").unwrap_or_default())?;
        let ch = attr(pedestal, "ch")
            .and_then(|c| c.trim().parse::<usize>().ok())
            .filter(|&c| c < ATWD_CHANNELS)
            .ok_or_else(|| CalError::malformed(self.node.path(), format!("{mbid}: bad baseline channel")))?;
        Ok((chip, ch))
    }
}

fn entries_mut(root: &mut Element) -> impl Iterator<Item = &mut Element> {
    child_elements_mut(root).filter(|e| e.name == DEVICE_TAG)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<domConfigs>
  <!-- string 1 -->
  <domConfig mbid="e9fed8c717dd" name="Alpha">
    <pmtHighVoltage> 2600 </pmtHighVoltage>
    <speTriggerDiscriminator>560</speTriggerDiscriminator>
    <pedestalSettings>
      <averagePedestal atwd="A" ch="0">130</averagePedestal>
      <averagePedestal atwd="A" ch="1">131</averagePedestal>
      <averagePedestal atwd="A" ch="2">132</averagePedestal>
      <averagePedestal atwd="B" ch="0">140</averagePedestal>
      <averagePedestal atwd="B" ch="1">141</averagePedestal>
      <averagePedestal atwd="B" ch="2">142</averagePedestal>
    </pedestalSettings>
  </domConfig>
  <domConfig mbid="0123456789ab" name="Beta">
    <pmtHighVoltage>2700</pmtHighVoltage>
    <pedestalSettings>
      <averagePedestal atwd="C" ch="0">130</averagePedestal>
    </pedestalSettings>
  </domConfig>
</domConfigs>
"#;

    fn config() -> DeviceConfig {
        DeviceConfig::from_node(ConfigNode::parse(".", "sps-01i.xml", DOC.as_bytes()).unwrap())
    }

    #[test]
    fn lists_devices_in_order() {
        let cfg = config();
        assert_eq!(cfg.mbids(), vec!["e9fed8c717dd", "0123456789ab"]);
        assert_eq!(cfg.len(), 2);
        assert!(cfg.contains("0123456789ab"));
    }

    #[test]
    fn get_trims_and_set_marks_dirty() {
        let mut cfg = config();
        assert_eq!(cfg.get("e9fed8c717dd", "pmtHighVoltage").as_deref(), Some("2600"));
        assert_eq!(cfg.setting::<i64>("e9fed8c717dd", "pmtHighVoltage").unwrap(), 2600);
        assert!(!cfg.is_modified());

        cfg.set("e9fed8c717dd", "pmtHighVoltage", 2711).unwrap();
        assert!(cfg.is_modified());
        assert_eq!(cfg.get("e9fed8c717dd", "pmtHighVoltage").as_deref(), Some("2711"));
        assert_eq!(cfg.get("0123456789ab", "pmtHighVoltage").as_deref(), Some("2700"));
    }

    #[test]
    fn set_unknown_device_or_field_is_not_found() {
        let mut cfg = config();
        assert!(matches!(cfg.set("ffffffffffff", "pmtHighVoltage", 1), Err(CalError::NotFound { .. })));
        assert!(matches!(cfg.set("e9fed8c717dd", "noSuchField", 1), Err(CalError::NotFound { .. })));
        assert!(!cfg.is_modified());
        assert!(cfg.get("ffffffffffff", "pmtHighVoltage").is_none());
    }

    #[test]
    fn baselines_round_trip() {
        let mut cfg = config();
        let mut bl = cfg.baselines("e9fed8c717dd").unwrap();
        assert_eq!(bl[(0, 2)], 132);
        assert_eq!(bl[(1, 0)], 140);

        bl.add_scalar_mut(1);
        cfg.set_baselines("e9fed8c717dd", &bl).unwrap();
        assert!(cfg.is_modified());
        let again = cfg.baselines("e9fed8c717dd").unwrap();
        assert_eq!(again[(0, 0)], 131);
        assert_eq!(again[(1, 2)], 143);
    }

    #[test]
    fn unknown_chip_is_rejected_without_mutation() {
        let mut cfg = config();
        assert!(matches!(cfg.baselines("0123456789ab"), Err(CalError::UnknownChip(c)) if c == "C"));
        let err = cfg.set_baselines("0123456789ab", &BaselineMatrix::zeros()).unwrap_err();
        assert!(matches!(err, CalError::UnknownChip(_)));
        assert!(!cfg.is_modified());
    }

    #[test]
    fn remove_reports_whether_found() {
        let mut cfg = config();
        assert!(cfg.remove("0123456789ab"));
        assert_eq!(cfg.len(), 1);
        assert!(cfg.is_modified());

        let mut untouched = config();
        assert!(!untouched.remove("ffffffffffff"));
        assert_eq!(untouched.len(), 2);
        assert!(!untouched.is_modified());
    }

    #[test]
    fn comments_survive_mutation() {
        let mut cfg = config();
        cfg.set("e9fed8c717dd", "pmtHighVoltage", 2601).unwrap();
        let out = String::from_utf8(cfg.node().to_bytes().unwrap()).unwrap();
        assert!(out.contains("<!-- string 1 -->"), "{out}");
        assert!(out.contains("<pmtHighVoltage>2601</pmtHighVoltage>"), "{out}");
    }
}
