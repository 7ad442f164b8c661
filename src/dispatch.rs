//! Device type registry and dispatch.
//!
//! Maps a context's declared hardware to a concrete capability profile: a
//! static, externally supplied description of the model's channel layout,
//! power-supply rails and calibration metadata. Unknown hardware is a
//! supported, reduced-capability path: classification returns `None` rather
//! than failing, and the surrounding construction logic builds a generic
//! context from it. Loading fails loudly; a profile file that cannot be
//! read or parsed is a typed error, never swallowed.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{InstrumentError, Result};
use crate::powersupply::RailLimits;
use crate::transport::ContextDesc;

/// The closed set of device types this layer dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// FMCOMMS transceiver boards.
    FmComms,
    /// ADALM2000-class mixed-signal instruments.
    M2k,
    /// Unrecognized but valid hardware; generic capabilities only.
    Other,
}

/// Exact-match lookup from a hardware-declared name to a device kind.
///
/// `None` means the name is truly unknown, which callers treat as
/// [`DeviceKind::Other`]; lookup itself cannot fault.
pub fn lookup_kind(name: &str) -> Option<DeviceKind> {
    match name {
        "FMCOMMS" => Some(DeviceKind::FmComms),
        "M2K" => Some(DeviceKind::M2k),
        _ => None,
    }
}

/// Calibrated range of one power-supply rail, as declared by a profile.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RailSpec {
    pub index: u32,
    pub min: f64,
    pub max: f64,
}

/// Power-supply layout of a device model.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PowerSupplySpec {
    /// Sub-device that sets rail targets.
    pub write_device: String,
    /// Sub-device that measures delivered rail values.
    pub read_device: String,
    /// Calibrated ranges, one per rail.
    #[serde(default)]
    pub rails: Vec<RailSpec>,
}

impl PowerSupplySpec {
    /// Rail limits ordered by rail index.
    pub fn rail_limits(&self) -> Vec<RailLimits> {
        let mut specs = self.rails.clone();
        specs.sort_by_key(|r| r.index);
        specs
            .into_iter()
            .map(|r| RailLimits {
                min: r.min,
                max: r.max,
            })
            .collect()
    }
}

/// Static capability description of one hardware model.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeviceProfile {
    /// Hardware name, e.g. `M2K`.
    pub name: String,
    /// Device kind the dispatcher constructs for this profile.
    pub kind: DeviceKind,
    /// Sub-device names that must all be present for the profile to match.
    pub compatible_devices: Vec<String>,
    /// Sub-devices exposed as multimeters.
    #[serde(default)]
    pub dmm_devices: Vec<String>,
    /// Power-supply layout, when the model has one.
    #[serde(default)]
    pub power_supply: Option<PowerSupplySpec>,
}

#[derive(Debug, Deserialize)]
struct ProfileFile {
    #[serde(default, rename = "profile")]
    profiles: Vec<DeviceProfile>,
}

const BUILTIN_PROFILES: &str = include_str!("profiles/builtin.toml");

/// The profile table the dispatcher resolves hardware against.
///
/// Stateless beyond this table; it holds no owning references into any
/// session.
#[derive(Debug)]
pub struct Registry {
    profiles: Vec<DeviceProfile>,
}

impl Registry {
    /// Registry holding only the built-in profiles.
    pub fn builtin() -> Result<Self> {
        Ok(Self {
            profiles: parse_profiles(BUILTIN_PROFILES, None)?,
        })
    }

    /// Registry with no profiles at all; everything classifies as unknown.
    pub fn empty() -> Self {
        Self {
            profiles: Vec::new(),
        }
    }

    /// Load every `.toml` profile file in `dir`, appending to the table.
    ///
    /// Returns the number of profiles added. Unreadable or malformed files
    /// fail with [`InstrumentError::Profile`].
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        let entries = fs::read_dir(dir).map_err(|e| InstrumentError::Profile {
            path: Some(dir.to_path_buf()),
            message: e.to_string(),
        })?;
        let mut added = 0;
        for entry in entries {
            let path = entry
                .map_err(|e| InstrumentError::Profile {
                    path: Some(dir.to_path_buf()),
                    message: e.to_string(),
                })?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let text = fs::read_to_string(&path).map_err(|e| InstrumentError::Profile {
                path: Some(path.clone()),
                message: e.to_string(),
            })?;
            let mut profiles = parse_profiles(&text, Some(&path))?;
            added += profiles.len();
            self.profiles.append(&mut profiles);
        }
        Ok(added)
    }

    /// All known profiles.
    pub fn profiles(&self) -> &[DeviceProfile] {
        &self.profiles
    }

    /// Find the profile matching an opened context.
    ///
    /// A profile matches when every one of its compatible devices is
    /// present on the context; the first match wins. `None` is the
    /// unknown-hardware outcome, not an error.
    pub fn classify(&self, desc: &ContextDesc) -> Option<&DeviceProfile> {
        self.profiles.iter().find(|profile| {
            !profile.compatible_devices.is_empty()
                && profile
                    .compatible_devices
                    .iter()
                    .all(|name| desc.devices.iter().any(|dev| dev.name == *name))
        })
    }
}

fn parse_profiles(text: &str, path: Option<&Path>) -> Result<Vec<DeviceProfile>> {
    let file: ProfileFile = toml::from_str(text).map_err(|e| InstrumentError::Profile {
        path: path.map(|p| p.to_path_buf()),
        message: e.to_string(),
    })?;
    Ok(file.profiles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::m2k_context;
    use crate::transport::{ContextDesc, DeviceDesc};
    use std::io::Write;

    fn desc_with_devices(names: &[&str]) -> ContextDesc {
        ContextDesc {
            hardware_name: "generic".to_string(),
            devices: names
                .iter()
                .map(|n| DeviceDesc {
                    name: n.to_string(),
                    attrs: Vec::new(),
                    channels: Vec::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_lookup_kind_two_outcomes() {
        assert_eq!(lookup_kind("M2K"), Some(DeviceKind::M2k));
        assert_eq!(lookup_kind("FMCOMMS"), Some(DeviceKind::FmComms));
        assert_eq!(lookup_kind("plutosdr"), None);
    }

    #[test]
    fn test_builtin_profiles_parse() {
        let registry = Registry::builtin().unwrap();
        assert_eq!(registry.profiles().len(), 2);
        let m2k = &registry.profiles()[0];
        assert_eq!(m2k.kind, DeviceKind::M2k);
        assert_eq!(m2k.dmm_devices, vec!["m2k-adc"]);
        let ps = m2k.power_supply.as_ref().unwrap();
        assert_eq!(ps.write_device, "m2k-ps-dac");
        assert_eq!(ps.rail_limits().len(), 2);
        assert_eq!(ps.rail_limits()[0].max, 5.0);
    }

    #[test]
    fn test_classify_matches_m2k_topology() {
        let registry = Registry::builtin().unwrap();
        let transport = crate::transport::mock::MockTransport::new(m2k_context());
        let desc = crate::transport::Transport::describe(&transport).unwrap();
        let profile = registry.classify(&desc).unwrap();
        assert_eq!(profile.name, "M2K");
    }

    #[test]
    fn test_classify_unknown_is_none_not_error() {
        let registry = Registry::builtin().unwrap();
        let desc = desc_with_devices(&["xadc", "ams"]);
        assert!(registry.classify(&desc).is_none());
    }

    #[test]
    fn test_classify_requires_all_compatible_devices() {
        let registry = Registry::builtin().unwrap();
        let desc = desc_with_devices(&["m2k-adc", "m2k-dac-a"]);
        assert!(registry.classify(&desc).is_none());
    }

    #[test]
    fn test_load_dir_appends_and_reports_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("pluto.toml")).unwrap();
        writeln!(
            file,
            r#"
[[profile]]
name = "PLUTO"
kind = "other"
compatible-devices = ["ad9361-phy", "cf-ad9361-dds-core-lpc"]
"#
        )
        .unwrap();
        // Non-TOML files are ignored.
        std::fs::write(dir.path().join("notes.txt"), "n/a").unwrap();

        let mut registry = Registry::builtin().unwrap();
        let added = registry.load_dir(dir.path()).unwrap();
        assert_eq!(added, 1);
        assert_eq!(registry.profiles().len(), 3);
    }

    #[test]
    fn test_load_dir_malformed_file_is_loud() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.toml"), "[[profile]]\nname = 3").unwrap();
        let mut registry = Registry::empty();
        let err = registry.load_dir(dir.path()).unwrap_err();
        assert!(matches!(err, InstrumentError::Profile { .. }));
    }
}
