//! Application version/capability registry served on the `proto-ver` endpoint

use serde::{
    Serialize, Serializer,
    ser::{SerializeMap, SerializeStruct},
};

use crate::core::error::{ProvError, ProvResult};

/// Label reserved for the manager's own entry
pub const PROV_LABEL: &str = "prov";

/// Version of the provisioning protocol implemented by the manager
pub const PROV_VERSION: &str = "v1.1";

/// Version and capabilities of one application service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    pub version: String,
    pub capabilities: Vec<String>,
}

impl Serialize for AppInfo {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("AppInfo", 2)?;
        s.serialize_field("ver", &self.version)?;
        s.serialize_field("cap", &self.capabilities)?;
        s.end()
    }
}

/// The manager's own `prov` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvInfo {
    pub ver: &'static str,
    pub sec_ver: u8,
    pub sec_patch_ver: u8,
    pub cap: Vec<String>,
}

/// Insertion-ordered label → app info mapping
#[derive(Debug, Default)]
pub struct AppInfoRegistry {
    entries: Vec<(String, AppInfo)>,
}

impl AppInfoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the entry for `label`
    pub fn set(&mut self, label: &str, version: &str, capabilities: &[&str]) -> ProvResult<()> {
        if label.is_empty() {
            return Err(ProvError::InvalidArgument("empty app info label".into()));
        }
        if label == PROV_LABEL {
            return Err(ProvError::InvalidArgument(format!(
                "label '{}' is reserved",
                PROV_LABEL
            )));
        }

        let info = AppInfo {
            version: copy_str(version)?,
            capabilities: capabilities
                .iter()
                .map(|cap| copy_str(cap))
                .collect::<ProvResult<_>>()?,
        };

        match self.entries.iter_mut().find(|(l, _)| l == label) {
            Some((_, existing)) => *existing = info,
            None => self.entries.push((copy_str(label)?, info)),
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn get(&self, label: &str) -> Option<&AppInfo> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, info)| info)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build the discovery document with `prov` first
    pub fn document<'a>(&'a self, prov: &'a ProvInfo) -> VersionDocument<'a> {
        VersionDocument {
            prov,
            entries: &self.entries,
        }
    }
}

/// Serializable view over the registry plus the `prov` entry
pub struct VersionDocument<'a> {
    prov: &'a ProvInfo,
    entries: &'a [(String, AppInfo)],
}

impl Serialize for VersionDocument<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len() + 1))?;
        map.serialize_entry(PROV_LABEL, self.prov)?;
        for (label, info) in self.entries {
            map.serialize_entry(label, info)?;
        }
        map.end()
    }
}

fn copy_str(s: &str) -> ProvResult<String> {
    let mut owned = String::new();
    owned
        .try_reserve_exact(s.len())
        .map_err(|_| ProvError::NoMemory)?;
    owned.push_str(s);
    Ok(owned)
}
