//! Power supply capability group.
//!
//! A power supply spans two sub-devices: a write device that sets rail
//! targets and a read device that measures what the rails actually deliver.
//! Push sets the target; read measures the delivered value. Callers push a
//! target and read back to confirm the rail settled under load.

use parking_lot::Mutex;
use tracing::debug;

use crate::analog::{raw_value, scaled_value};
use crate::channel::Channel;
use crate::error::{InstrumentError, Result};
use crate::session::Session;
use crate::transport::{ChannelCaps, Direction};

/// Calibrated output range of one rail.
#[derive(Debug, Clone, Copy)]
pub struct RailLimits {
    pub min: f64,
    pub max: f64,
}

struct Rail {
    write: Channel,
    read: Channel,
    limits: Option<RailLimits>,
}

/// Groups channels into independently enabled rails.
pub struct PowerSupply {
    write_device: String,
    read_device: String,
    rails: Vec<Rail>,
    /// Tracked enable state, one flag per rail.
    enabled: Mutex<Vec<bool>>,
}

impl PowerSupply {
    /// Construct from a session plus optional explicit write and read
    /// device names.
    ///
    /// When a name is omitted, the matching sub-device is discovered by
    /// convention: the write device is the first one carrying output rail
    /// channels with a `powerdown` control, the read device the first one
    /// carrying input channels with the same channel ids. Fails with
    /// [`InstrumentError::DeviceNotFound`] when nothing matches.
    ///
    /// `limits` supplies the calibrated range per rail index; rails beyond
    /// the slice are unconstrained.
    pub fn new(
        session: Session,
        write_device: Option<&str>,
        read_device: Option<&str>,
        limits: &[RailLimits],
    ) -> Result<Self> {
        let write_index = match write_device {
            Some(name) => session
                .find_device(name)
                .ok_or_else(|| InstrumentError::DeviceNotFound {
                    name: name.to_string(),
                })?,
            None => discover_write_device(&session).ok_or_else(|| {
                InstrumentError::DeviceNotFound {
                    name: "power supply write device".to_string(),
                }
            })?,
        };
        let read_index = match read_device {
            Some(name) => session
                .find_device(name)
                .ok_or_else(|| InstrumentError::DeviceNotFound {
                    name: name.to_string(),
                })?,
            None => discover_read_device(&session, write_index).ok_or_else(|| {
                InstrumentError::DeviceNotFound {
                    name: "power supply read device".to_string(),
                }
            })?,
        };

        // A rail index is valid only when the channel id exists in both the
        // write and the read device channel sets.
        let mut rails = Vec::new();
        let write_desc = session.device(write_index)?.clone();
        for chn in &write_desc.channels {
            if chn.direction != Direction::Output || !chn.caps.contains(ChannelCaps::RAW) {
                continue;
            }
            if let Some(read_chn) = session.find_channel(read_index, &chn.id, Direction::Input) {
                // The monitor side must be raw-sampled too, or the pair
                // could only ever fail at read time.
                if !session
                    .channel(read_index, read_chn)?
                    .caps
                    .contains(ChannelCaps::RAW)
                {
                    continue;
                }
                rails.push(Rail {
                    write: Channel::by_index(session.clone(), write_index, chn.index)?,
                    read: Channel::by_index(session.clone(), read_index, read_chn)?,
                    limits: limits.get(rails.len()).copied(),
                });
            }
        }

        if rails.is_empty() {
            return Err(InstrumentError::DeviceNotFound {
                name: "power supply rails".to_string(),
            });
        }

        let write_device = write_desc.name;
        let read_device = session.device(read_index)?.name.clone();
        debug!(
            write = %write_device,
            read = %read_device,
            rails = rails.len(),
            "Created power supply group"
        );

        let count = rails.len();
        Ok(Self {
            write_device,
            read_device,
            rails,
            enabled: Mutex::new(vec![false; count]),
        })
    }

    /// Name of the write sub-device.
    pub fn write_device(&self) -> &str {
        &self.write_device
    }

    /// Name of the read sub-device.
    pub fn read_device(&self) -> &str {
        &self.read_device
    }

    /// Number of rails.
    pub fn rail_count(&self) -> usize {
        self.rails.len()
    }

    /// Enable or disable the rail at `index`.
    ///
    /// Does not set an output value. Fails with
    /// [`InstrumentError::InvalidArgument`] on an out-of-range index,
    /// before any transport exchange.
    pub fn enable_channel(&self, index: usize, enable: bool) -> Result<()> {
        let rail = self.rail(index)?;
        if rail.write.has_attr("powerdown") {
            rail.write
                .write_attr("powerdown", if enable { 0.0 } else { 1.0 })?;
        }
        self.enabled.lock()[index] = enable;
        Ok(())
    }

    /// Enable or disable every rail.
    pub fn enable_all(&self, enable: bool) -> Result<()> {
        for index in 0..self.rails.len() {
            self.enable_channel(index, enable)?;
        }
        Ok(())
    }

    /// Tracked enable state of the rail at `index`.
    pub fn is_channel_enabled(&self, index: usize) -> Result<bool> {
        self.rail(index)?;
        Ok(self.enabled.lock()[index])
    }

    /// Whether at least one rail is enabled.
    pub fn any_channel_enabled(&self) -> bool {
        self.enabled.lock().iter().any(|&e| e)
    }

    /// Set the target output value of the rail at `index`.
    ///
    /// Fails with [`InstrumentError::OutOfRange`] when `value` exceeds the
    /// rail's calibrated range, before any transport exchange.
    pub fn push_channel(&self, index: usize, value: f64) -> Result<()> {
        let rail = self.rail(index)?;
        if let Some(limits) = rail.limits {
            if value < limits.min || value > limits.max {
                return Err(InstrumentError::OutOfRange {
                    value,
                    min: limits.min,
                    max: limits.max,
                });
            }
        }
        let raw = raw_value(&rail.write, value)?;
        rail.write.write_attr("raw", raw)
    }

    /// Measure the value actually delivered at the rail, independent of the
    /// pushed target.
    pub fn read_channel(&self, index: usize) -> Result<f64> {
        let rail = self.rail(index)?;
        let raw = rail.read.read_attr("raw")?;
        scaled_value(&rail.read, raw)
    }

    /// Power the output DACs down or back up, when the write device exposes
    /// that control.
    pub fn powerdown_dacs(&self, powerdown: bool) -> Result<()> {
        for rail in &self.rails {
            if rail.write.has_attr("powerdown") {
                rail.write
                    .write_attr("powerdown", if powerdown { 1.0 } else { 0.0 })?;
            }
        }
        Ok(())
    }

    fn rail(&self, index: usize) -> Result<&Rail> {
        self.rails.get(index).ok_or_else(|| {
            InstrumentError::invalid_argument(format!(
                "rail index {index} out of range ({} rails)",
                self.rails.len()
            ))
        })
    }
}

fn discover_write_device(session: &Session) -> Option<u32> {
    for index in 0..session.device_count() {
        let desc = session.device(index).ok()?;
        let hit = desc.channels.iter().any(|chn| {
            chn.direction == Direction::Output
                && chn.caps.contains(ChannelCaps::RAW)
                && chn.has_attr("powerdown")
        });
        if hit {
            return Some(index);
        }
    }
    None
}

fn discover_read_device(session: &Session, write_index: u32) -> Option<u32> {
    let write_desc = session.device(write_index).ok()?;
    let rail_ids: Vec<&str> = write_desc
        .channels
        .iter()
        .filter(|chn| chn.direction == Direction::Output && chn.caps.contains(ChannelCaps::RAW))
        .map(|chn| chn.id.as_str())
        .collect();
    if rail_ids.is_empty() {
        return None;
    }
    // Several devices can expose matching input channels (the main ADC
    // usually does); the monitoring device is the one whose name shares the
    // longest prefix with the write device, e.g. m2k-ps-dac / m2k-ps-adc.
    let mut best: Option<(usize, u32)> = None;
    for index in 0..session.device_count() {
        if index == write_index {
            continue;
        }
        let hit = rail_ids
            .iter()
            .all(|id| session.find_channel(index, id, Direction::Input).is_some());
        if !hit {
            continue;
        }
        let name = &session.device(index).ok()?.name;
        let prefix = common_prefix_len(&write_desc.name, name);
        if best.map_or(true, |(len, _)| prefix > len) {
            best = Some((prefix, index));
        }
    }
    best.map(|(_, index)| index)
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.bytes().zip(b.bytes()).take_while(|(x, y)| x == y).count()
}

impl std::fmt::Debug for PowerSupply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerSupply")
            .field("write_device", &self.write_device)
            .field("read_device", &self.read_device)
            .field("rails", &self.rails.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{m2k_context, MockBackend, MockCounters};
    use std::sync::Arc;

    fn supply_with_counters(limits: &[RailLimits]) -> (PowerSupply, Arc<MockCounters>) {
        let backend = MockBackend::new().with_context("usb:1.5", m2k_context());
        let counters = backend.counters();
        let session = Session::open(&backend, &"usb:1.5".parse().unwrap()).unwrap();
        let supply = PowerSupply::new(
            session,
            Some("m2k-ps-dac"),
            Some("m2k-ps-adc"),
            limits,
        )
        .unwrap();
        (supply, counters)
    }

    #[test]
    fn test_discovery_by_convention() {
        let backend = MockBackend::new().with_context("usb:1.5", m2k_context());
        let session = Session::open(&backend, &"usb:1.5".parse().unwrap()).unwrap();
        let supply = PowerSupply::new(session, None, None, &[]).unwrap();
        assert_eq!(supply.write_device(), "m2k-ps-dac");
        assert_eq!(supply.read_device(), "m2k-ps-adc");
        assert_eq!(supply.rail_count(), 2);
    }

    #[test]
    fn test_missing_explicit_device() {
        let backend = MockBackend::new().with_context("usb:1.5", m2k_context());
        let session = Session::open(&backend, &"usb:1.5".parse().unwrap()).unwrap();
        let err = PowerSupply::new(session, Some("ps-gone"), None, &[]).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_monitor_without_raw_is_not_paired() {
        let mut ctx = crate::transport::mock::MockContext::new("bench-psu");
        ctx.add_device("psu-dac");
        ctx.add_output_channel(
            "psu-dac",
            "voltage0",
            &[("raw", 0.0), ("scale", 1.0), ("powerdown", 1.0)],
        );
        // Monitor channel exposes only a pre-scaled reading, no raw sample.
        ctx.add_device("psu-adc");
        ctx.add_input_channel("psu-adc", "voltage0", &[("input", 500.0)]);

        let backend = MockBackend::new().with_context("usb:3.2", ctx);
        let session = Session::open(&backend, &"usb:3.2".parse().unwrap()).unwrap();
        let err = PowerSupply::new(session, Some("psu-dac"), Some("psu-adc"), &[]).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_enable_round_trip() {
        let (supply, _) = supply_with_counters(&[]);
        assert!(!supply.is_channel_enabled(0).unwrap());
        supply.enable_channel(0, true).unwrap();
        assert!(supply.is_channel_enabled(0).unwrap());
        assert!(supply.any_channel_enabled());
        supply.enable_all(false).unwrap();
        assert!(!supply.any_channel_enabled());
    }

    #[test]
    fn test_out_of_range_index_performs_no_io() {
        let (supply, counters) = supply_with_counters(&[]);
        let before = counters.io_total();
        assert!(supply.enable_channel(7, true).unwrap_err().is_domain());
        assert!(supply.push_channel(7, 1.0).unwrap_err().is_domain());
        assert!(supply.read_channel(7).unwrap_err().is_domain());
        assert_eq!(counters.io_total(), before);
    }

    #[test]
    fn test_push_then_read_closes_the_loop() {
        let limits = [
            RailLimits { min: -5.0, max: 5.0 },
            RailLimits { min: -2.0, max: 2.0 },
        ];
        let (supply, _) = supply_with_counters(&limits);
        supply.push_channel(0, -1.0).unwrap();
        supply.enable_channel(0, true).unwrap();
        let measured = supply.read_channel(0).unwrap();
        assert!((measured - (-1.0)).abs() < 1e-9);
    }

    #[test]
    fn test_push_out_of_range_value() {
        let limits = [
            RailLimits { min: -5.0, max: 5.0 },
            RailLimits { min: -2.0, max: 2.0 },
        ];
        let (supply, counters) = supply_with_counters(&limits);
        // The boundary itself is valid.
        supply.push_channel(1, -2.0).unwrap();
        let before = counters.io_total();
        let err = supply.push_channel(1, -2.5).unwrap_err();
        assert!(matches!(err, InstrumentError::OutOfRange { .. }));
        assert_eq!(counters.io_total(), before);
    }
}
