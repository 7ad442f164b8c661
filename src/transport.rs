//! Transport seam between the instrument layer and the industrial-I/O driver.
//!
//! The underlying driver (device enumeration, USB/network exchanges, DMA) is
//! an external collaborator. It appears here as the [`Transport`] and
//! [`Backend`] traits plus a set of immutable descriptors probed once when a
//! session opens. Everything above this module works against the traits,
//! which is what makes the whole layer testable with the call-counting
//! [`mock`] transport.

pub mod mock;

use bitflags::bitflags;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

use crate::error::{InstrumentError, Result};

/// A parsed connection target.
///
/// Supported schemes: `ip:<address>` for network-attached contexts,
/// `usb:<bus>.<device>` for a local bus address, and the empty string for
/// auto-detection over all visible backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Uri {
    /// Network address, e.g. `ip:192.168.2.1`.
    Ip(String),
    /// Local USB bus address, e.g. `usb:1.5`.
    Usb { bus: u32, device: u32 },
    /// Empty URI: enumerate all visible devices and try each in turn.
    Auto,
}

impl FromStr for Uri {
    type Err = InstrumentError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(Self::Auto);
        }
        if let Some(addr) = s.strip_prefix("ip:") {
            if addr.is_empty() {
                return Err(InstrumentError::invalid_argument("empty ip address"));
            }
            return Ok(Self::Ip(addr.to_string()));
        }
        if let Some(addr) = s.strip_prefix("usb:") {
            let (bus, device) = addr.split_once('.').ok_or_else(|| {
                InstrumentError::invalid_argument(format!(
                    "usb uri must be 'usb:<bus>.<device>', got '{s}'"
                ))
            })?;
            let bus = bus.parse().map_err(|_| {
                InstrumentError::invalid_argument(format!("invalid usb bus in '{s}'"))
            })?;
            let device = device.parse().map_err(|_| {
                InstrumentError::invalid_argument(format!("invalid usb device in '{s}'"))
            })?;
            return Ok(Self::Usb { bus, device });
        }
        Err(InstrumentError::invalid_argument(format!(
            "unknown uri scheme in '{s}'"
        )))
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(addr) => write!(f, "ip:{addr}"),
            Self::Usb { bus, device } => write!(f, "usb:{bus}.{device}"),
            Self::Auto => Ok(()),
        }
    }
}

/// Direction of a channel, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

bitflags! {
    /// Capability bits of a channel, derived from the attributes the
    /// transport reports for it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChannelCaps: u32 {
        /// Carries a `raw` sample attribute.
        const RAW = 1;
        /// Carries an `input` (pre-scaled) attribute.
        const INPUT = 1 << 1;
        /// Carries a `processed` attribute.
        const PROCESSED = 1 << 2;
        /// Participates in buffered scans.
        const SCAN_ELEMENT = 1 << 3;
    }
}

impl ChannelCaps {
    /// Derive capability bits from an attribute name list.
    pub fn from_attrs<S: AsRef<str>>(attrs: &[S]) -> Self {
        let mut caps = Self::empty();
        for attr in attrs {
            match attr.as_ref() {
                "raw" => caps |= Self::RAW,
                "input" => caps |= Self::INPUT,
                "processed" => caps |= Self::PROCESSED,
                _ => {}
            }
        }
        caps
    }

    /// Whether a single value can be sampled from this channel at all.
    pub fn is_sampled(self) -> bool {
        self.intersects(Self::RAW | Self::INPUT | Self::PROCESSED)
    }
}

/// Description of one channel on a sub-device.
#[derive(Debug, Clone)]
pub struct ChannelDesc {
    /// Channel id, e.g. `voltage0`.
    pub id: String,
    /// Optional human-readable label, e.g. `+V`.
    pub name: Option<String>,
    /// Index within the owning device.
    pub index: u32,
    /// Fixed direction.
    pub direction: Direction,
    /// Capability bits.
    pub caps: ChannelCaps,
    /// Attribute names the transport exposes for this channel.
    pub attrs: Vec<String>,
}

impl ChannelDesc {
    /// Whether the transport exposes the named attribute on this channel.
    pub fn has_attr(&self, attr: &str) -> bool {
        self.attrs.iter().any(|a| a == attr)
    }
}

/// Description of one sub-device on the context.
#[derive(Debug, Clone)]
pub struct DeviceDesc {
    /// Device name, e.g. `m2k-adc`.
    pub name: String,
    /// Device-level attribute names.
    pub attrs: Vec<String>,
    /// Channels in device order.
    pub channels: Vec<ChannelDesc>,
}

impl DeviceDesc {
    /// Whether the transport exposes the named device-level attribute.
    pub fn has_attr(&self, attr: &str) -> bool {
        self.attrs.iter().any(|a| a == attr)
    }
}

/// Description of an open transport context, probed once at session open.
#[derive(Debug, Clone)]
pub struct ContextDesc {
    /// Hardware name the context declares, e.g. `M2K`.
    pub hardware_name: String,
    /// Sub-devices in context order.
    pub devices: Vec<DeviceDesc>,
}

/// Blocking operations on one open transport connection.
///
/// Every call blocks the calling thread until the underlying exchange
/// completes or fails; no call retries, batches or reorders. The handle is
/// singly-owned and non-reentrant, so the session serializes access to it.
pub trait Transport: Send {
    /// Probe the context structure. Called once when the session opens.
    fn describe(&self) -> Result<ContextDesc>;

    /// Read a channel attribute as a floating-point value.
    fn read_channel_attr(&mut self, device: u32, channel: u32, attr: &str) -> Result<f64>;

    /// Write a channel attribute.
    fn write_channel_attr(&mut self, device: u32, channel: u32, attr: &str, value: f64)
        -> Result<()>;

    /// Read a device-level attribute.
    fn read_device_attr(&mut self, device: u32, attr: &str) -> Result<f64>;

    /// Write a device-level attribute.
    fn write_device_attr(&mut self, device: u32, attr: &str, value: f64) -> Result<()>;

    /// Toggle whether a channel participates in buffered scans.
    fn set_channel_enabled(&mut self, device: u32, channel: u32, enabled: bool) -> Result<()>;

    /// Query the enable state last set for a channel.
    fn channel_enabled(&mut self, device: u32, channel: u32) -> Result<bool>;

    /// Queue a full vector of physical-unit samples to the channel buffer.
    ///
    /// Either all samples are queued or the call fails; a partial write is
    /// never a visible outcome.
    fn push(&mut self, device: u32, channel: u32, samples: &[f64]) -> Result<()>;

    /// Queue a full vector of integer-coded samples to the channel buffer.
    fn push_raw(&mut self, device: u32, channel: u32, samples: &[i16]) -> Result<()>;
}

impl std::fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Transport")
    }
}

/// A transport backend: enumerates visible contexts and opens connections.
pub trait Backend {
    /// Enumerate URIs of all visible contexts. Order is backend-defined and
    /// not guaranteed stable across runs.
    fn scan(&self) -> Vec<String>;

    /// Open a connection to the context at `uri`.
    ///
    /// Fails with [`InstrumentError::Connection`] when nothing answers.
    /// `uri` is always concrete; [`Uri::Auto`] is resolved by the caller
    /// via [`Backend::scan`].
    fn connect(&self, uri: &Uri) -> Result<Box<dyn Transport>>;
}
