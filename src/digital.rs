//! Digital input and output capability groups.
//!
//! Each group owns the lines of one logic device, in device order. A line
//! level is carried in the `raw` attribute: zero is low, anything else is
//! high. Discovery follows the hardware convention of naming logic devices
//! with a `logic` infix, the same devices the analog discovery skips.

use tracing::debug;

use crate::channel::Channel;
use crate::error::{InstrumentError, Result};
use crate::session::Session;
use crate::transport::{ChannelCaps, Direction};

fn collect_lines(session: &Session, device: u32, direction: Direction) -> Result<Vec<Channel>> {
    let desc = session.device(device)?;
    let mut lines = Vec::new();
    for chn in &desc.channels {
        if chn.direction == direction && chn.caps.contains(ChannelCaps::RAW) {
            lines.push(Channel::by_index(session.clone(), device, chn.index)?);
        }
    }
    Ok(lines)
}

fn discover_logic_device(session: &Session, direction: Direction) -> Option<u32> {
    for index in 0..session.device_count() {
        let desc = session.device(index).ok()?;
        if !desc.name.contains("logic") {
            continue;
        }
        let hit = desc
            .channels
            .iter()
            .any(|chn| chn.direction == direction && chn.caps.contains(ChannelCaps::RAW));
        if hit {
            return Some(index);
        }
    }
    None
}

/// Digital input group: the lines of one logic device.
pub struct DigitalIn {
    device_name: String,
    lines: Vec<Channel>,
}

impl std::fmt::Debug for DigitalIn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigitalIn")
            .field("device_name", &self.device_name)
            .field("lines", &self.lines.len())
            .finish()
    }
}

impl DigitalIn {
    /// Claim the input lines of the named logic device.
    pub fn new(session: Session, device_name: &str) -> Result<Self> {
        let device = session
            .find_device(device_name)
            .ok_or_else(|| InstrumentError::DeviceNotFound {
                name: device_name.to_string(),
            })?;
        let lines = collect_lines(&session, device, Direction::Input)?;
        if lines.is_empty() {
            return Err(InstrumentError::ResourceNotFound {
                what: format!("digital input lines on '{device_name}'"),
            });
        }
        debug!(device = %device_name, lines = lines.len(), "Created digital input group");
        Ok(Self {
            device_name: device_name.to_string(),
            lines,
        })
    }

    /// Discover the logic device carrying input lines.
    pub fn discover(session: Session) -> Result<Self> {
        let device = discover_logic_device(&session, Direction::Input).ok_or_else(|| {
            InstrumentError::DeviceNotFound {
                name: "digital input device".to_string(),
            }
        })?;
        let name = session.device(device)?.name.clone();
        Self::new(session, &name)
    }

    /// Name of the owning logic device.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Number of owned lines.
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Enable or disable the line at `index` for buffered scans.
    pub fn enable_line(&self, index: usize, enable: bool) -> Result<()> {
        self.line_at(index)?.enable(enable)
    }

    /// Read the level of the line at `index`.
    pub fn read_level(&self, index: usize) -> Result<bool> {
        Ok(self.line_at(index)?.read_attr("raw")? != 0.0)
    }

    fn line_at(&self, index: usize) -> Result<&Channel> {
        self.lines.get(index).ok_or_else(|| {
            InstrumentError::invalid_argument(format!(
                "line index {index} out of range ({} lines)",
                self.lines.len()
            ))
        })
    }
}

/// Digital output group: the lines of one logic device.
pub struct DigitalOut {
    device_name: String,
    lines: Vec<Channel>,
}

impl std::fmt::Debug for DigitalOut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigitalOut")
            .field("device_name", &self.device_name)
            .field("lines", &self.lines.len())
            .finish()
    }
}

impl DigitalOut {
    /// Claim the output lines of the named logic device.
    pub fn new(session: Session, device_name: &str) -> Result<Self> {
        let device = session
            .find_device(device_name)
            .ok_or_else(|| InstrumentError::DeviceNotFound {
                name: device_name.to_string(),
            })?;
        let lines = collect_lines(&session, device, Direction::Output)?;
        if lines.is_empty() {
            return Err(InstrumentError::ResourceNotFound {
                what: format!("digital output lines on '{device_name}'"),
            });
        }
        debug!(device = %device_name, lines = lines.len(), "Created digital output group");
        Ok(Self {
            device_name: device_name.to_string(),
            lines,
        })
    }

    /// Discover the logic device carrying output lines.
    pub fn discover(session: Session) -> Result<Self> {
        let device = discover_logic_device(&session, Direction::Output).ok_or_else(|| {
            InstrumentError::DeviceNotFound {
                name: "digital output device".to_string(),
            }
        })?;
        let name = session.device(device)?.name.clone();
        Self::new(session, &name)
    }

    /// Name of the owning logic device.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Number of owned lines.
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Enable or disable the line at `index` for buffered scans.
    pub fn enable_line(&self, index: usize, enable: bool) -> Result<()> {
        self.line_at(index)?.enable(enable)
    }

    /// Drive the line at `index` high or low.
    pub fn set_level(&self, index: usize, high: bool) -> Result<()> {
        self.line_at(index)?
            .write_attr("raw", if high { 1.0 } else { 0.0 })
    }

    /// Queue a full vector of line-level codes to the line's buffer.
    pub fn push_raw(&self, index: usize, pattern: &[i16]) -> Result<()> {
        self.line_at(index)?.write_raw(pattern)
    }

    fn line_at(&self, index: usize) -> Result<&Channel> {
        self.lines.get(index).ok_or_else(|| {
            InstrumentError::invalid_argument(format!(
                "line index {index} out of range ({} lines)",
                self.lines.len()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{m2k_context, MockBackend};

    fn session() -> Session {
        let backend = MockBackend::new().with_context("usb:1.5", m2k_context());
        Session::open(&backend, &"usb:1.5".parse().unwrap()).unwrap()
    }

    #[test]
    fn test_discovery_finds_logic_devices() {
        let din = DigitalIn::discover(session()).unwrap();
        assert_eq!(din.device_name(), "m2k-logic-analyzer-rx");
        assert_eq!(din.line_count(), 2);

        let dout = DigitalOut::discover(session()).unwrap();
        assert_eq!(dout.device_name(), "m2k-logic-analyzer-tx");
        assert_eq!(dout.line_count(), 2);
    }

    #[test]
    fn test_read_levels() {
        let din = DigitalIn::new(session(), "m2k-logic-analyzer-rx").unwrap();
        assert!(din.read_level(0).unwrap());
        assert!(!din.read_level(1).unwrap());
    }

    #[test]
    fn test_set_level_round_trip() {
        let s = session();
        let dout = DigitalOut::new(s.clone(), "m2k-logic-analyzer-tx").unwrap();
        dout.set_level(0, true).unwrap();
        let tx = s.find_device("m2k-logic-analyzer-tx").unwrap();
        let line = Channel::by_index(s, tx, 0).unwrap();
        assert_eq!(line.read_attr("raw").unwrap(), 1.0);
        dout.set_level(0, false).unwrap();
        assert_eq!(line.read_attr("raw").unwrap(), 0.0);
    }

    #[test]
    fn test_line_index_out_of_range() {
        let din = DigitalIn::new(session(), "m2k-logic-analyzer-rx").unwrap();
        assert!(din.read_level(9).unwrap_err().is_domain());
        let dout = DigitalOut::new(session(), "m2k-logic-analyzer-tx").unwrap();
        assert!(dout.set_level(9, true).unwrap_err().is_domain());
    }

    #[test]
    fn test_missing_logic_device() {
        let err = DigitalIn::new(session(), "m2k-logic-analyzer-zz").unwrap_err();
        assert!(err.is_not_found());
        // A device with no input lines has nothing to claim.
        let err = DigitalIn::new(session(), "m2k-dac-a").unwrap_err();
        assert!(err.is_not_found());
    }
}
