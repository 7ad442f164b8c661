//! Analog input and output capability groups.
//!
//! Each group owns the sampled channels of one sub-device, in device order.
//! Discovery follows the convention of the underlying hardware: the first
//! sub-device carrying `raw`-attribute channels of the wanted direction,
//! skipping logic-analyzer devices.

use tracing::debug;

use crate::channel::Channel;
use crate::error::{InstrumentError, Result};
use crate::session::Session;
use crate::transport::{ChannelCaps, Direction};

fn collect_channels(
    session: &Session,
    device: u32,
    direction: Direction,
) -> Result<Vec<Channel>> {
    let desc = session.device(device)?;
    let mut channels = Vec::new();
    for chn in &desc.channels {
        if chn.direction == direction && chn.caps.contains(ChannelCaps::RAW) {
            channels.push(Channel::by_index(session.clone(), device, chn.index)?);
        }
    }
    Ok(channels)
}

fn discover_device(session: &Session, direction: Direction) -> Option<u32> {
    for index in 0..session.device_count() {
        let desc = session.device(index).ok()?;
        if desc.name.contains("logic") {
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

/// Millivolt attribute convention for voltage channels.
const MILLI: f64 = 1000.0;

/// Analog input group: the sampled input channels of one sub-device.
pub struct AnalogIn {
    device_name: String,
    channels: Vec<Channel>,
}

impl std::fmt::Debug for AnalogIn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalogIn")
            .field("device_name", &self.device_name)
            .field("channels", &self.channels.len())
            .finish()
    }
}

impl AnalogIn {
    /// Claim the input channels of the named sub-device.
    pub fn new(session: Session, device_name: &str) -> Result<Self> {
        let device = session
            .find_device(device_name)
            .ok_or_else(|| InstrumentError::DeviceNotFound {
                name: device_name.to_string(),
            })?;
        let channels = collect_channels(&session, device, Direction::Input)?;
        if channels.is_empty() {
            return Err(InstrumentError::ResourceNotFound {
                what: format!("analog input channels on '{device_name}'"),
            });
        }
        debug!(device = %device_name, channels = channels.len(), "Created analog input group");
        Ok(Self {
            device_name: device_name.to_string(),
            channels,
        })
    }

    /// Discover the analog input sub-device by convention.
    pub fn discover(session: Session) -> Result<Self> {
        let device = discover_device(&session, Direction::Input).ok_or_else(|| {
            InstrumentError::DeviceNotFound {
                name: "analog input device".to_string(),
            }
        })?;
        let name = session.device(device)?.name.clone();
        Self::new(session, &name)
    }

    /// Name of the owning sub-device.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Owned channels in device order.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Number of owned channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Read one raw sample from the channel at `index`.
    pub fn read_raw(&self, index: usize) -> Result<f64> {
        self.channel_at(index)?.read_attr("raw")
    }

    /// Read one calibrated sample in volts from the channel at `index`.
    ///
    /// Applies the channel's `offset` and `scale` attributes when present;
    /// before ADC calibration this is a valid raw-scaled value.
    pub fn read_voltage(&self, index: usize) -> Result<f64> {
        let chn = self.channel_at(index)?;
        let raw = chn.read_attr("raw")?;
        Ok(scaled_value(chn, raw)? / MILLI)
    }

    fn channel_at(&self, index: usize) -> Result<&Channel> {
        self.channels.get(index).ok_or_else(|| {
            InstrumentError::invalid_argument(format!(
                "channel index {index} out of range ({} channels)",
                self.channels.len()
            ))
        })
    }
}

/// Analog output group: the sampled output channels of one sub-device.
pub struct AnalogOut {
    device_name: String,
    channels: Vec<Channel>,
}

impl std::fmt::Debug for AnalogOut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalogOut")
            .field("device_name", &self.device_name)
            .field("channels", &self.channels.len())
            .finish()
    }
}

impl AnalogOut {
    /// Claim the output channels of the named sub-device.
    pub fn new(session: Session, device_name: &str) -> Result<Self> {
        let device = session
            .find_device(device_name)
            .ok_or_else(|| InstrumentError::DeviceNotFound {
                name: device_name.to_string(),
            })?;
        let channels = collect_channels(&session, device, Direction::Output)?;
        if channels.is_empty() {
            return Err(InstrumentError::ResourceNotFound {
                what: format!("analog output channels on '{device_name}'"),
            });
        }
        debug!(device = %device_name, channels = channels.len(), "Created analog output group");
        Ok(Self {
            device_name: device_name.to_string(),
            channels,
        })
    }

    /// Discover the analog output sub-device by convention.
    pub fn discover(session: Session) -> Result<Self> {
        let device = discover_device(&session, Direction::Output).ok_or_else(|| {
            InstrumentError::DeviceNotFound {
                name: "analog output device".to_string(),
            }
        })?;
        let name = session.device(device)?.name.clone();
        Self::new(session, &name)
    }

    /// Name of the owning sub-device.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Owned channels in device order.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Number of owned channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Write one raw sample to the channel at `index`.
    pub fn write_raw(&self, index: usize, value: f64) -> Result<()> {
        self.channel_at(index)?.write_attr("raw", value)
    }

    /// Write one sample in volts to the channel at `index`, applying the
    /// channel's `scale` and `offset` attributes when present.
    pub fn write_voltage(&self, index: usize, volts: f64) -> Result<()> {
        let chn = self.channel_at(index)?;
        let raw = raw_value(chn, volts * MILLI)?;
        chn.write_attr("raw", raw)
    }

    /// Queue a full vector of physical-unit samples to the channel buffer.
    pub fn push(&self, index: usize, data: &[f64]) -> Result<()> {
        self.channel_at(index)?.write(data)
    }

    /// Queue a full vector of integer-coded samples to the channel buffer.
    pub fn push_raw(&self, index: usize, data: &[i16]) -> Result<()> {
        self.channel_at(index)?.write_raw(data)
    }

    fn channel_at(&self, index: usize) -> Result<&Channel> {
        self.channels.get(index).ok_or_else(|| {
            InstrumentError::invalid_argument(format!(
                "channel index {index} out of range ({} channels)",
                self.channels.len()
            ))
        })
    }
}

/// Physical value from a raw sample: `(raw + offset) * scale`.
pub(crate) fn scaled_value(chn: &Channel, raw: f64) -> Result<f64> {
    let offset = if chn.has_attr("offset") {
        chn.read_attr("offset")?
    } else {
        0.0
    };
    let scale = if chn.has_attr("scale") {
        chn.read_attr("scale")?
    } else {
        1.0
    };
    Ok((raw + offset) * scale)
}

/// Raw sample from a physical value: inverse of [`scaled_value`].
pub(crate) fn raw_value(chn: &Channel, value: f64) -> Result<f64> {
    let offset = if chn.has_attr("offset") {
        chn.read_attr("offset")?
    } else {
        0.0
    };
    let scale = if chn.has_attr("scale") {
        chn.read_attr("scale")?
    } else {
        1.0
    };
    if scale == 0.0 {
        return Err(InstrumentError::io("channel reports zero scale"));
    }
    Ok(value / scale - offset)
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
    fn test_analog_in_discovery_skips_nothing_relevant() {
        let ain = AnalogIn::discover(session()).unwrap();
        assert_eq!(ain.device_name(), "m2k-adc");
        assert_eq!(ain.channel_count(), 2);
    }

    #[test]
    fn test_analog_in_scaled_read() {
        let ain = AnalogIn::new(session(), "m2k-adc").unwrap();
        assert_eq!(ain.read_raw(0).unwrap(), 1200.0);
        // (1200 + 0) * 2.5 mV = 3.0 V
        assert!((ain.read_voltage(0).unwrap() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_analog_in_index_out_of_range() {
        let ain = AnalogIn::new(session(), "m2k-adc").unwrap();
        assert!(ain.read_raw(5).unwrap_err().is_domain());
    }

    #[test]
    fn test_analog_out_discovery_and_write() {
        let s = session();
        let aout = AnalogOut::discover(s).unwrap();
        assert_eq!(aout.device_name(), "m2k-dac-a");
        aout.write_raw(0, 512.0).unwrap();
        aout.push(0, &[0.1, 0.2]).unwrap();
    }

    #[test]
    fn test_analog_out_missing_device() {
        let err = AnalogOut::new(session(), "m2k-dds").unwrap_err();
        assert!(err.is_not_found());
    }
}
