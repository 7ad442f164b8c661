//! Channel abstraction: one logical analog or digital line on a sub-device.
//!
//! A channel's direction is fixed at construction and never changes; it can
//! be enabled or disabled for buffered scans, but not re-typed. Each channel
//! is owned by exactly one capability group and holds only a session clone
//! plus indices, so it can never outlive the transport it points into.

use tracing::debug;

use crate::error::{InstrumentError, Result};
use crate::session::Session;
use crate::transport::{ChannelCaps, Direction};

/// One physical device line, input or output.
#[derive(Clone)]
pub struct Channel {
    session: Session,
    device: u32,
    channel: u32,
    // Identity is immutable for the channel's whole lifetime; cached here so
    // the accessors stay pure and free of transport I/O.
    id: String,
    name: Option<String>,
    index: u32,
    direction: Direction,
    caps: ChannelCaps,
}

impl Channel {
    /// Construct by (device index, channel index).
    ///
    /// Fails with [`InstrumentError::ResourceNotFound`] when the index does
    /// not exist on the device.
    pub fn by_index(session: Session, device: u32, channel: u32) -> Result<Self> {
        let desc = session.channel(device, channel)?.clone();
        debug!(device, channel, id = %desc.id, "Claimed channel by index");
        Ok(Self {
            session,
            device,
            channel,
            id: desc.id,
            name: desc.name,
            index: desc.index,
            direction: desc.direction,
            caps: desc.caps,
        })
    }

    /// Construct by (device index, channel name, direction).
    ///
    /// The name matches either the channel id (`voltage0`) or its label.
    pub fn by_name(session: Session, device: u32, name: &str, direction: Direction) -> Result<Self> {
        let channel = session
            .find_channel(device, name, direction)
            .ok_or_else(|| InstrumentError::ResourceNotFound {
                what: format!("channel '{name}'"),
            })?;
        Self::by_index(session, device, channel)
    }

    /// Channel id, e.g. `voltage0`.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Optional human-readable label.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Index within the owning device.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Whether this is an output channel.
    pub fn is_output(&self) -> bool {
        self.direction == Direction::Output
    }

    /// Fixed direction of the channel.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Capability bits of the channel.
    pub fn caps(&self) -> ChannelCaps {
        self.caps
    }

    /// Whether the transport exposes the named attribute on this channel.
    pub fn has_attr(&self, attr: &str) -> bool {
        // Attribute sets are immutable after probe, so this consults the
        // session arena and performs no transport I/O.
        self.session
            .channel(self.device, self.channel)
            .map(|desc| desc.has_attr(attr))
            .unwrap_or(false)
    }

    /// Enable or disable participation in buffered scans.
    ///
    /// Idempotent; has no effect on single-value reads and writes.
    pub fn enable(&self, enable: bool) -> Result<()> {
        self.session
            .with_transport(|t| t.set_channel_enabled(self.device, self.channel, enable))
    }

    /// Query the enable state last set for this channel.
    pub fn is_enabled(&self) -> Result<bool> {
        self.session
            .with_transport(|t| t.channel_enabled(self.device, self.channel))
    }

    /// Read the named attribute as a floating-point value.
    ///
    /// Fails with [`InstrumentError::ResourceNotFound`] before any transport
    /// exchange when the channel does not carry the attribute.
    pub fn read_attr(&self, attr: &str) -> Result<f64> {
        self.validate_attr(attr)?;
        self.session
            .with_transport(|t| t.read_channel_attr(self.device, self.channel, attr))
    }

    /// Write the named attribute.
    pub fn write_attr(&self, attr: &str, value: f64) -> Result<()> {
        self.validate_attr(attr)?;
        self.session
            .with_transport(|t| t.write_channel_attr(self.device, self.channel, attr, value))
    }

    /// Queue a full vector of physical-unit samples to the channel buffer.
    ///
    /// Atomic from the caller's perspective: either all samples are queued
    /// or the call fails. Fails with [`InstrumentError::InvalidArgument`]
    /// before any transport exchange when the channel is not an output or
    /// the buffer is empty.
    pub fn write(&self, data: &[f64]) -> Result<()> {
        self.validate_push(data.len())?;
        self.session
            .with_transport(|t| t.push(self.device, self.channel, data))
    }

    /// Queue a full vector of integer-coded samples to the channel buffer.
    pub fn write_raw(&self, data: &[i16]) -> Result<()> {
        self.validate_push(data.len())?;
        self.session
            .with_transport(|t| t.push_raw(self.device, self.channel, data))
    }

    fn validate_push(&self, samples: usize) -> Result<()> {
        if self.direction != Direction::Output {
            return Err(InstrumentError::invalid_argument(format!(
                "channel '{}' is not output-capable",
                self.id
            )));
        }
        if samples == 0 {
            return Err(InstrumentError::invalid_argument(format!(
                "empty sample buffer for channel '{}'",
                self.id
            )));
        }
        Ok(())
    }

    fn validate_attr(&self, attr: &str) -> Result<()> {
        if !self.has_attr(attr) {
            return Err(InstrumentError::ResourceNotFound {
                what: format!("attribute '{attr}' on channel '{}'", self.id),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("device", &self.device)
            .field("index", &self.index)
            .field("direction", &self.direction)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{m2k_context, MockBackend, MockCounters};
    use crate::session::Session;
    use std::sync::Arc;

    fn session_with_counters() -> (Session, Arc<MockCounters>) {
        let backend = MockBackend::new().with_context("usb:1.5", m2k_context());
        let counters = backend.counters();
        let session = Session::open(&backend, &"usb:1.5".parse().unwrap()).unwrap();
        (session, counters)
    }

    #[test]
    fn test_construct_by_index_and_name() {
        let (session, _) = session_with_counters();
        let by_index = Channel::by_index(session.clone(), 0, 1).unwrap();
        assert_eq!(by_index.id(), "voltage1");
        assert!(!by_index.is_output());

        let by_name = Channel::by_name(session, 0, "voltage1", Direction::Input).unwrap();
        assert_eq!(by_name.index(), 1);
    }

    #[test]
    fn test_construct_missing_fails() {
        let (session, _) = session_with_counters();
        assert!(Channel::by_index(session.clone(), 0, 9).unwrap_err().is_not_found());
        let err = Channel::by_name(session, 0, "voltage0", Direction::Output).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_enable_round_trip() {
        let (session, _) = session_with_counters();
        let chn = Channel::by_index(session, 0, 0).unwrap();
        assert!(!chn.is_enabled().unwrap());
        chn.enable(true).unwrap();
        assert!(chn.is_enabled().unwrap());
        chn.enable(true).unwrap();
        assert!(chn.is_enabled().unwrap());
        chn.enable(false).unwrap();
        assert!(!chn.is_enabled().unwrap());
    }

    #[test]
    fn test_write_requires_output_direction() {
        let (session, counters) = session_with_counters();
        let input = Channel::by_index(session, 0, 0).unwrap();
        let before = counters.io_total();
        assert!(input.write(&[1.0, 2.0]).unwrap_err().is_domain());
        assert!(input.write_raw(&[1, 2]).unwrap_err().is_domain());
        // Direction misuse is rejected before any transport exchange.
        assert_eq!(counters.io_total(), before);
    }

    #[test]
    fn test_empty_write_is_rejected_without_io() {
        let (session, counters) = session_with_counters();
        let dac = session.find_device("m2k-dac-a").unwrap();
        let out = Channel::by_index(session, dac, 0).unwrap();
        let before = counters.io_total();
        assert!(out.write(&[]).unwrap_err().is_domain());
        assert!(out.write_raw(&[]).unwrap_err().is_domain());
        // An empty buffer never reaches the transport as a silent no-op.
        assert_eq!(counters.pushes(), 0);
        assert_eq!(counters.io_total(), before);
    }

    #[test]
    fn test_write_pushes_once() {
        let (session, counters) = session_with_counters();
        let dac = session.find_device("m2k-dac-a").unwrap();
        let out = Channel::by_index(session, dac, 0).unwrap();
        out.write(&[0.25, 0.5, 0.75]).unwrap();
        assert_eq!(counters.pushes(), 1);
        // The mock latches the last queued sample.
        assert_eq!(out.read_attr("raw").unwrap(), 0.75);
    }

    #[test]
    fn test_missing_attr_read_fails_without_io() {
        let (session, counters) = session_with_counters();
        let chn = Channel::by_index(session, 0, 0).unwrap();
        let before = counters.io_total();
        assert!(chn.read_attr("sampling_frequency").unwrap_err().is_not_found());
        assert_eq!(counters.io_total(), before);
    }
}
