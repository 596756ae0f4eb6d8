//! Run configuration: the top-level document plus the per-hub device documents
//! and the optional trigger document it references.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::CalError;
use crate::io::xml::{child_elements, child_elements_mut, trimmed_text};
use crate::runconfig::device::DeviceConfig;
use crate::runconfig::layout::LayoutMode;
use crate::runconfig::node::ConfigNode;

pub const DEVICE_DIR: &str = "domconfigs";
pub const TRIGGER_DIR: &str = "trigger";
pub const TRIGGER_TAG: &str = "triggerConfig";

/// Hub ids in this range are surface hubs.
const SURFACE_HUBS: std::ops::Range<u32> = 200..220;

/// One hub reference and the device document it resolves to.
#[derive(Debug, Clone)]
pub struct Hub {
    pub id: String,
    pub config: DeviceConfig,
}

/// New names for a versioned write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenamePolicy {
    /// Base name of the new run configuration.
    pub name: String,
    pub version: u32,
    /// Base name shared by the new device documents.
    pub device_base: String,
}

impl RenamePolicy {
    /// `sps-<hubtag>-<base>-<version>`, without extension.
    pub fn device_config_name(&self, hub_id: &str) -> Option<String> {
        let tag = hub_tag(hub_id)?;
        Some(format!("sps-{tag}-{}-{}", self.device_base, self.version))
    }

    pub fn run_config_filename(&self) -> String {
        format!("{}-V{}.xml", self.name, self.version)
    }
}

/// `NNt` for surface hubs (numbered from 200), `NNi` for everything else.
pub fn hub_tag(hub_id: &str) -> Option<String> {
    let id: u32 = hub_id.trim().parse().ok()?;
    if SURFACE_HUBS.contains(&id) {
        Some(format!("{:02}t", id - 200))
    } else {
        Some(format!("{id:02}i"))
    }
}

#[derive(Debug, Clone)]
pub struct ConfigurationTreeStore {
    node: ConfigNode,
    layout: LayoutMode,
    trigger: Option<ConfigNode>,
    hubs: Vec<Hub>,
}

impl ConfigurationTreeStore {
    /// Load a run configuration and everything it references.
    ///
    /// Fails with `LayoutMismatch` when no hub reference resolves under
    /// `layout`.
    pub fn load(path: &Path, layout: LayoutMode) -> Result<Self, CalError> {
        let node = ConfigNode::load(path)?;
        let dir = node.dir().to_path_buf();

        let mut trigger = None;
        let mut hubs: Vec<Hub> = Vec::new();
        for entry in child_elements(node.root()) {
            if entry.name == TRIGGER_TAG {
                let name = trimmed_text(entry)
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| CalError::malformed(path, "empty trigger reference"))?;
                let trigger_path = dir.join(TRIGGER_DIR).join(format!("{name}.xml"));
                trigger = Some(ConfigNode::load(&trigger_path)?);
            } else if entry.name == layout.hub_tag() {
                let id = layout
                    .hub_id(entry)
                    .ok_or_else(|| CalError::malformed(path, format!("<{}> without hub id", entry.name)))?
                    .to_string();
                let child = layout
                    .child_name(entry)
                    .ok_or_else(|| CalError::malformed(path, format!("hub {id} has no device configuration")))?;
                let config = DeviceConfig::load(&dir.join(DEVICE_DIR).join(format!("{child}.xml")))?;
                debug!(hub = %id, devices = config.len(), "loaded device configuration");

                if let Some(existing) = hubs.iter_mut().find(|h| h.id == id) {
                    warn!(hub = %id, "hub listed twice; keeping the later entry");
                    existing.config = config;
                } else {
                    hubs.push(Hub { id, config });
                }
            }
        }

        if hubs.is_empty() {
            return Err(CalError::LayoutMismatch {
                path: path.to_path_buf(),
                layout,
            });
        }
        info!(path = %path.display(), %layout, hubs = hubs.len(), "loaded run configuration");
        Ok(Self {
            node,
            layout,
            trigger,
            hubs,
        })
    }

    /// Load with the new layout, retrying once with the old one.
    pub fn load_any(path: &Path) -> Result<Self, CalError> {
        match Self::load(path, LayoutMode::New) {
            Err(CalError::LayoutMismatch { layout, .. }) => {
                let retry = layout.other();
                warn!(path = %path.display(), %retry, "couldn't parse run configuration; trying other layout");
                Self::load(path, retry)
            }
            other => other,
        }
    }

    pub fn layout(&self) -> LayoutMode {
        self.layout
    }

    pub fn node(&self) -> &ConfigNode {
        &self.node
    }

    pub fn trigger(&self) -> Option<&ConfigNode> {
        self.trigger.as_ref()
    }

    pub fn hubs(&self) -> &[Hub] {
        &self.hubs
    }

    pub fn hub(&self, id: &str) -> Option<&DeviceConfig> {
        self.hubs.iter().find(|h| h.id == id).map(|h| &h.config)
    }

    pub fn hub_mut(&mut self, id: &str) -> Option<&mut DeviceConfig> {
        self.hubs.iter_mut().find(|h| h.id == id).map(|h| &mut h.config)
    }

    pub fn device_configs(&self) -> impl Iterator<Item = &DeviceConfig> {
        self.hubs.iter().map(|h| &h.config)
    }

    pub fn device_configs_mut(&mut self) -> impl Iterator<Item = &mut DeviceConfig> {
        self.hubs.iter_mut().map(|h| &mut h.config)
    }

    pub fn hub_count(&self) -> usize {
        self.hubs.len()
    }

    pub fn device_count(&self) -> usize {
        self.device_configs().map(DeviceConfig::len).sum()
    }

    pub fn is_modified(&self) -> bool {
        self.node.is_modified() || self.hubs.iter().any(|h| h.config.is_modified())
    }

    /// Remove a device from the first hub that has it.
    pub fn remove_device(&mut self, mbid: &str) -> bool {
        self.device_configs_mut().any(|cfg| cfg.remove(mbid))
    }

    /// Persist modified device documents, then the run configuration.
    ///
    /// With a policy, each modified device document is saved under its new
    /// versioned name, the parent reference is updated, and the parent is
    /// saved as `<name>-V<version>.xml`. Without one, documents keep their
    /// names. Unmodified device documents are never rewritten. Returns the
    /// written paths, parent last.
    pub fn write(&mut self, policy: Option<&RenamePolicy>) -> Result<Vec<PathBuf>, CalError> {
        let mut written = Vec::new();
        let layout = self.layout;
        let parent_path = self.node.path();

        for hub in self.hubs.iter_mut().filter(|h| h.config.is_modified()) {
            let Some(policy) = policy else {
                written.push(hub.config.save(None)?);
                continue;
            };
            let name = policy
                .device_config_name(&hub.id)
                .ok_or_else(|| CalError::malformed(&parent_path, format!("hub id '{}' is not numeric", hub.id)))?;

            let root = self.node.root_mut();
            for entry in child_elements_mut(root).filter(|e| e.name == layout.hub_tag()) {
                if layout.hub_id(entry) == Some(hub.id.as_str()) {
                    layout.set_child_name(entry, &name);
                }
            }
            self.node.mark_modified();
            written.push(hub.config.save(Some(&format!("{name}.xml")))?);
            info!(hub = %hub.id, name = %name, "wrote renamed device configuration");
        }

        if let Some(policy) = policy {
            let filename = policy.run_config_filename();
            written.push(self.node.save(Some(&filename))?);
        } else if self.node.is_modified() || !written.is_empty() {
            written.push(self.node.save(None)?);
        }
        Ok(written)
    }
}
