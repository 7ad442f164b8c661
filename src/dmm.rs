//! Digital multimeter capability group.
//!
//! A DMM owns the readable channels of one sub-device: input channels
//! carrying a `raw`, `input` or `processed` attribute. Each read translates
//! the sampled code into a calibrated physical value with a unit inferred
//! from the channel family (voltage, temperature, current, ...).

use tracing::debug;

use crate::channel::Channel;
use crate::error::{InstrumentError, Result};
use crate::logger;
use crate::session::Session;
use crate::transport::{ChannelDesc, Direction};

/// A calibrated measurement from one DMM channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Channel id the value was sampled from.
    pub channel: String,
    /// Value in the physical unit below.
    pub value: f64,
    /// Physical unit, e.g. `V`.
    pub unit: String,
}

/// Digital multimeter: single-shot and all-channel calibrated reads.
pub struct Dmm {
    name: String,
    channels: Vec<Channel>,
}

impl Dmm {
    /// Claim the readable channels of the named sub-device.
    ///
    /// Fails with [`InstrumentError::DeviceNotFound`] when the device does
    /// not exist, and with [`InstrumentError::ResourceNotFound`] when it
    /// exposes no readable channel.
    pub fn new(session: Session, device_name: &str) -> Result<Self> {
        let device = session
            .find_device(device_name)
            .ok_or_else(|| InstrumentError::DeviceNotFound {
                name: device_name.to_string(),
            })?;

        let desc = session.device(device)?.clone();
        let mut channels = Vec::new();
        for chn in &desc.channels {
            if is_dmm_channel(chn) {
                channels.push(Channel::by_index(session.clone(), device, chn.index)?);
            }
        }
        if channels.is_empty() {
            return Err(InstrumentError::ResourceNotFound {
                what: format!("readable channels on '{device_name}'"),
            });
        }

        debug!(device = %device_name, channels = channels.len(), "Created DMM group");
        Ok(Self {
            name: device_name.to_string(),
            channels,
        })
    }

    /// Name of the owning sub-device.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ids of the owned channels, in device order.
    pub fn channels(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.id().to_string()).collect()
    }

    /// Number of owned channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Read the channel matching `name`.
    ///
    /// Fails with [`InstrumentError::ChannelNotFound`] when no owned channel
    /// matches; nothing is cached or mutated on failure.
    pub fn read_channel(&self, name: &str) -> Result<Reading> {
        let chn = self
            .channels
            .iter()
            .find(|c| c.id() == name || c.name() == Some(name))
            .ok_or_else(|| InstrumentError::ChannelNotFound {
                name: name.to_string(),
            })?;
        read_one(chn)
    }

    /// Scan every owned channel once, in device order.
    ///
    /// Strict: any channel's transport failure aborts the whole call. Use
    /// [`Dmm::try_read_all`] when partial results are acceptable.
    pub fn read_all(&self) -> Result<Vec<Reading>> {
        self.channels.iter().map(read_one).collect()
    }

    /// Scan every owned channel once, tolerating per-channel failures.
    ///
    /// Returns one result per channel, in device order; a failed channel
    /// aborts only its own reading.
    pub fn try_read_all(&self) -> Vec<Result<Reading>> {
        self.channels
            .iter()
            .map(|chn| {
                let res = read_one(chn);
                if let Err(err) = &res {
                    logger::warn(&format!(
                        "dmm {}: skipping channel {}: {err}",
                        self.name,
                        chn.id()
                    ));
                }
                res
            })
            .collect()
    }
}

fn is_dmm_channel(desc: &ChannelDesc) -> bool {
    desc.direction == Direction::Input && desc.caps.is_sampled()
}

/// Sample one channel and translate to a calibrated (value, unit) pair.
///
/// Source attribute priority follows the hardware convention: `raw`, then
/// `processed`, then `input`; `offset` is added and `scale` multiplied when
/// present.
fn read_one(chn: &Channel) -> Result<Reading> {
    let source = ["raw", "processed", "input"]
        .into_iter()
        .find(|attr| chn.has_attr(attr))
        .ok_or_else(|| InstrumentError::ResourceNotFound {
            what: format!("sample attribute on channel '{}'", chn.id()),
        })?;

    let mut value = chn.read_attr(source)?;
    if chn.has_attr("offset") {
        value += chn.read_attr("offset")?;
    }
    if chn.has_attr("scale") {
        value *= chn.read_attr("scale")?;
    }

    let (divisor, unit) = unit_for(chn.id());
    Ok(Reading {
        channel: chn.id().to_string(),
        value: value / divisor,
        unit: unit.to_string(),
    })
}

/// Unit and scaling for a channel id family. Voltage and temperature
/// attributes follow the millivalue convention and are scaled down.
fn unit_for(id: &str) -> (f64, &'static str) {
    if id.starts_with("voltage") {
        (1000.0, "V")
    } else if id.starts_with("temp") {
        (1000.0, "°C")
    } else if id.starts_with("current") {
        (1.0, "mA")
    } else if id.starts_with("accel") {
        (1.0, "m/s²")
    } else if id.starts_with("anglvel") {
        (1.0, "rad/s")
    } else if id.starts_with("pressure") {
        (1.0, "kPa")
    } else if id.starts_with("magn") {
        (1.0, "Gauss")
    } else {
        (1.0, "")
    }
}

impl std::fmt::Debug for Dmm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dmm")
            .field("name", &self.name)
            .field("channels", &self.channels.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{m2k_context, MockBackend, MockContext};

    fn open(ctx: MockContext) -> Session {
        let backend = MockBackend::new().with_context("usb:1.5", ctx);
        Session::open(&backend, &"usb:1.5".parse().unwrap()).unwrap()
    }

    #[test]
    fn test_owns_only_readable_input_channels() {
        let dmm = Dmm::new(open(m2k_context()), "m2k-adc").unwrap();
        assert_eq!(dmm.channels(), vec!["voltage0", "voltage1"]);
    }

    #[test]
    fn test_output_channels_never_qualify() {
        let err = Dmm::new(open(m2k_context()), "m2k-dac-a").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_read_channel_applies_calibration() {
        let dmm = Dmm::new(open(m2k_context()), "m2k-adc").unwrap();
        let reading = dmm.read_channel("voltage0").unwrap();
        // (1200 + 0) * 2.5 = 3000 mV = 3.0 V
        assert_eq!(reading.unit, "V");
        assert!((reading.value - 3.0).abs() < 1e-9);
        assert_eq!(reading.channel, "voltage0");
    }

    #[test]
    fn test_read_unknown_channel() {
        let dmm = Dmm::new(open(m2k_context()), "m2k-adc").unwrap();
        let err = dmm.read_channel("voltage9").unwrap_err();
        assert!(matches!(err, InstrumentError::ChannelNotFound { .. }));
    }

    #[test]
    fn test_read_all_returns_one_reading_per_channel() {
        let dmm = Dmm::new(open(m2k_context()), "m2k-adc").unwrap();
        let readings = dmm.read_all().unwrap();
        assert_eq!(readings.len(), dmm.channel_count());
        for reading in &readings {
            assert!(!reading.channel.is_empty());
            assert!(!reading.unit.is_empty());
            assert!(reading.value.is_finite());
        }
    }

    #[test]
    fn test_read_all_aborts_on_failure_but_try_read_all_is_partial() {
        let mut ctx = m2k_context();
        ctx.fail_channel_attr("m2k-adc", "voltage1", "raw");
        let dmm = Dmm::new(open(ctx), "m2k-adc").unwrap();

        assert!(dmm.read_all().is_err());

        let partial = dmm.try_read_all();
        assert_eq!(partial.len(), 2);
        assert!(partial[0].is_ok());
        assert!(partial[1].is_err());
    }

    #[test]
    fn test_unit_families() {
        assert_eq!(unit_for("temp0"), (1000.0, "°C"));
        assert_eq!(unit_for("current2"), (1.0, "mA"));
        assert_eq!(unit_for("humidity0"), (1.0, ""));
    }
}
