//! In-memory mock transport for testing without hardware.
//!
//! The mock keeps per-operation call counters so tests can assert that
//! argument-domain failures perform no transport I/O at all, and supports
//! per-attribute fault injection for exercising error paths. Writes can be
//! mirrored to other attributes through links, which is how closed-loop
//! behavior (push a rail target, read the measured value back) is simulated.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{InstrumentError, Result};
use crate::transport::{
    Backend, ChannelCaps, ChannelDesc, ContextDesc, DeviceDesc, Direction, Transport, Uri,
};

/// Per-operation call counters, shared between a [`MockBackend`] and every
/// transport it opens.
#[derive(Debug, Default)]
pub struct MockCounters {
    attr_reads: AtomicUsize,
    attr_writes: AtomicUsize,
    pushes: AtomicUsize,
    enables: AtomicUsize,
}

impl MockCounters {
    /// Number of attribute reads performed.
    pub fn attr_reads(&self) -> usize {
        self.attr_reads.load(Ordering::SeqCst)
    }

    /// Number of attribute writes performed.
    pub fn attr_writes(&self) -> usize {
        self.attr_writes.load(Ordering::SeqCst)
    }

    /// Number of buffer pushes performed.
    pub fn pushes(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    /// Number of enable/disable toggles performed.
    pub fn enables(&self) -> usize {
        self.enables.load(Ordering::SeqCst)
    }

    /// Total number of transport operations of any kind.
    pub fn io_total(&self) -> usize {
        self.attr_reads() + self.attr_writes() + self.pushes() + self.enables()
    }
}

#[derive(Debug, Clone)]
struct MockChannel {
    id: String,
    label: Option<String>,
    direction: Direction,
    attrs: BTreeMap<String, f64>,
    enabled: bool,
}

#[derive(Debug, Clone)]
struct MockDevice {
    name: String,
    attrs: BTreeMap<String, f64>,
    channels: Vec<MockChannel>,
}

/// One attribute write mirrored to another attribute, scaled by `gain`.
#[derive(Debug, Clone)]
struct Link {
    from: (String, String, String),
    to: (String, String, String),
    gain: f64,
}

/// Buildable description of a mock context: devices, channels, attribute
/// values, mirror links and injected faults.
#[derive(Debug, Clone, Default)]
pub struct MockContext {
    hardware_name: String,
    devices: Vec<MockDevice>,
    links: Vec<Link>,
    faults: Vec<(String, String, String)>,
}

impl MockContext {
    /// Create an empty context declaring `hardware_name`.
    pub fn new(hardware_name: &str) -> Self {
        Self {
            hardware_name: hardware_name.to_string(),
            ..Self::default()
        }
    }

    /// Add an empty device.
    pub fn add_device(&mut self, name: &str) {
        self.devices.push(MockDevice {
            name: name.to_string(),
            attrs: BTreeMap::new(),
            channels: Vec::new(),
        });
    }

    /// Add a device-level attribute with an initial value.
    ///
    /// # Panics
    ///
    /// Panics when the device was never added; mock topologies are built in
    /// test setup where that is a programming error.
    pub fn add_device_attr(&mut self, device: &str, attr: &str, value: f64) {
        let dev = self.device_mut(device);
        dev.attrs.insert(attr.to_string(), value);
    }

    /// Add an input channel with the given attribute values.
    pub fn add_input_channel(&mut self, device: &str, id: &str, attrs: &[(&str, f64)]) {
        self.add_channel(device, id, Direction::Input, attrs);
    }

    /// Add an output channel with the given attribute values.
    pub fn add_output_channel(&mut self, device: &str, id: &str, attrs: &[(&str, f64)]) {
        self.add_channel(device, id, Direction::Output, attrs);
    }

    /// Make every exchange touching `attr` on the given channel fail.
    pub fn fail_channel_attr(&mut self, device: &str, channel: &str, attr: &str) {
        self.faults
            .push((device.to_string(), channel.to_string(), attr.to_string()));
    }

    /// Mirror writes of one attribute to another, scaled by `gain`.
    pub fn link(
        &mut self,
        from: (&str, &str, &str),
        to: (&str, &str, &str),
        gain: f64,
    ) {
        self.links.push(Link {
            from: (from.0.to_string(), from.1.to_string(), from.2.to_string()),
            to: (to.0.to_string(), to.1.to_string(), to.2.to_string()),
            gain,
        });
    }

    fn add_channel(&mut self, device: &str, id: &str, direction: Direction, attrs: &[(&str, f64)]) {
        let dev = self.device_mut(device);
        dev.channels.push(MockChannel {
            id: id.to_string(),
            label: None,
            direction,
            attrs: attrs
                .iter()
                .map(|(name, value)| (name.to_string(), *value))
                .collect(),
            enabled: false,
        });
    }

    #[allow(clippy::panic)]
    fn device_mut(&mut self, name: &str) -> &mut MockDevice {
        match self.devices.iter_mut().find(|d| d.name == name) {
            Some(dev) => dev,
            None => panic!("mock device '{name}' was never added"),
        }
    }

    fn describe(&self) -> ContextDesc {
        ContextDesc {
            hardware_name: self.hardware_name.clone(),
            devices: self
                .devices
                .iter()
                .map(|dev| DeviceDesc {
                    name: dev.name.clone(),
                    attrs: dev.attrs.keys().cloned().collect(),
                    channels: dev
                        .channels
                        .iter()
                        .enumerate()
                        .map(|(index, chn)| {
                            let attrs: Vec<String> = chn.attrs.keys().cloned().collect();
                            let mut caps = ChannelCaps::from_attrs(&attrs);
                            if caps.contains(ChannelCaps::RAW) {
                                caps |= ChannelCaps::SCAN_ELEMENT;
                            }
                            ChannelDesc {
                                id: chn.id.clone(),
                                name: chn.label.clone(),
                                index: index as u32,
                                direction: chn.direction,
                                caps,
                                attrs,
                            }
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

/// Mock implementation of [`Transport`] backed by a [`MockContext`].
pub struct MockTransport {
    ctx: MockContext,
    counters: Arc<MockCounters>,
}

impl MockTransport {
    /// Wrap a context description with fresh counters.
    pub fn new(ctx: MockContext) -> Self {
        Self {
            ctx,
            counters: Arc::new(MockCounters::default()),
        }
    }

    /// Wrap a context description, reporting into shared counters.
    pub fn with_counters(ctx: MockContext, counters: Arc<MockCounters>) -> Self {
        Self { ctx, counters }
    }

    /// Handle to the call counters.
    pub fn counters(&self) -> Arc<MockCounters> {
        Arc::clone(&self.counters)
    }

    fn channel(&mut self, device: u32, channel: u32) -> Result<&mut MockChannel> {
        let dev = self
            .ctx
            .devices
            .get_mut(device as usize)
            .ok_or_else(|| InstrumentError::io(format!("mock: no device index {device}")))?;
        dev.channels
            .get_mut(channel as usize)
            .ok_or_else(|| InstrumentError::io(format!("mock: no channel index {channel}")))
    }

    fn check_fault(&self, device: u32, channel: u32, attr: &str) -> Result<()> {
        let dev = self
            .ctx
            .devices
            .get(device as usize)
            .ok_or_else(|| InstrumentError::io(format!("mock: no device index {device}")))?;
        let chn = dev
            .channels
            .get(channel as usize)
            .ok_or_else(|| InstrumentError::io(format!("mock: no channel index {channel}")))?;
        let hit = self
            .ctx
            .faults
            .iter()
            .any(|(d, c, a)| *d == dev.name && *c == chn.id && a == attr);
        if hit {
            Err(InstrumentError::io(format!(
                "mock: injected fault on {}/{}/{attr}",
                dev.name, chn.id
            )))
        } else {
            Ok(())
        }
    }

    fn propagate_links(&mut self, device: u32, channel: u32, attr: &str, value: f64) {
        let (dev_name, chn_id) = {
            let dev = &self.ctx.devices[device as usize];
            (dev.name.clone(), dev.channels[channel as usize].id.clone())
        };
        let links: Vec<Link> = self
            .ctx
            .links
            .iter()
            .filter(|l| l.from == (dev_name.clone(), chn_id.clone(), attr.to_string()))
            .cloned()
            .collect();
        for link in links {
            let mirrored = value * link.gain;
            if let Some(dev) = self.ctx.devices.iter_mut().find(|d| d.name == link.to.0) {
                if let Some(chn) = dev.channels.iter_mut().find(|c| c.id == link.to.1) {
                    chn.attrs.insert(link.to.2.clone(), mirrored);
                }
            }
        }
    }
}

impl Transport for MockTransport {
    fn describe(&self) -> Result<ContextDesc> {
        Ok(self.ctx.describe())
    }

    fn read_channel_attr(&mut self, device: u32, channel: u32, attr: &str) -> Result<f64> {
        self.counters.attr_reads.fetch_add(1, Ordering::SeqCst);
        self.check_fault(device, channel, attr)?;
        let chn = self.channel(device, channel)?;
        chn.attrs.get(attr).copied().ok_or_else(|| {
            InstrumentError::io(format!("mock: channel has no attribute '{attr}'"))
        })
    }

    fn write_channel_attr(
        &mut self,
        device: u32,
        channel: u32,
        attr: &str,
        value: f64,
    ) -> Result<()> {
        self.counters.attr_writes.fetch_add(1, Ordering::SeqCst);
        self.check_fault(device, channel, attr)?;
        let chn = self.channel(device, channel)?;
        if !chn.attrs.contains_key(attr) {
            return Err(InstrumentError::io(format!(
                "mock: channel has no attribute '{attr}'"
            )));
        }
        chn.attrs.insert(attr.to_string(), value);
        self.propagate_links(device, channel, attr, value);
        Ok(())
    }

    fn read_device_attr(&mut self, device: u32, attr: &str) -> Result<f64> {
        self.counters.attr_reads.fetch_add(1, Ordering::SeqCst);
        let dev = self
            .ctx
            .devices
            .get(device as usize)
            .ok_or_else(|| InstrumentError::io(format!("mock: no device index {device}")))?;
        dev.attrs.get(attr).copied().ok_or_else(|| {
            InstrumentError::io(format!("mock: device has no attribute '{attr}'"))
        })
    }

    fn write_device_attr(&mut self, device: u32, attr: &str, value: f64) -> Result<()> {
        self.counters.attr_writes.fetch_add(1, Ordering::SeqCst);
        let dev = self
            .ctx
            .devices
            .get_mut(device as usize)
            .ok_or_else(|| InstrumentError::io(format!("mock: no device index {device}")))?;
        if !dev.attrs.contains_key(attr) {
            return Err(InstrumentError::io(format!(
                "mock: device has no attribute '{attr}'"
            )));
        }
        dev.attrs.insert(attr.to_string(), value);
        Ok(())
    }

    fn set_channel_enabled(&mut self, device: u32, channel: u32, enabled: bool) -> Result<()> {
        self.counters.enables.fetch_add(1, Ordering::SeqCst);
        let chn = self.channel(device, channel)?;
        chn.enabled = enabled;
        Ok(())
    }

    fn channel_enabled(&mut self, device: u32, channel: u32) -> Result<bool> {
        self.counters.attr_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.channel(device, channel)?.enabled)
    }

    fn push(&mut self, device: u32, channel: u32, samples: &[f64]) -> Result<()> {
        self.counters.pushes.fetch_add(1, Ordering::SeqCst);
        self.check_fault(device, channel, "raw")?;
        if let Some(last) = samples.last().copied() {
            let chn = self.channel(device, channel)?;
            chn.attrs.insert("raw".to_string(), last);
            self.propagate_links(device, channel, "raw", last);
        }
        Ok(())
    }

    fn push_raw(&mut self, device: u32, channel: u32, samples: &[i16]) -> Result<()> {
        self.counters.pushes.fetch_add(1, Ordering::SeqCst);
        self.check_fault(device, channel, "raw")?;
        if let Some(last) = samples.last().copied() {
            let chn = self.channel(device, channel)?;
            chn.attrs.insert("raw".to_string(), f64::from(last));
            self.propagate_links(device, channel, "raw", f64::from(last));
        }
        Ok(())
    }
}

/// Mock implementation of [`Backend`]: a fixed set of URIs, each answering
/// with a fresh transport over a cloned [`MockContext`]. All transports
/// opened through one backend share the backend's counters.
#[derive(Default)]
pub struct MockBackend {
    contexts: Vec<(String, MockContext)>,
    counters: Arc<MockCounters>,
}

impl MockBackend {
    /// Create an empty backend (scan finds nothing).
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a context under a URI, builder style.
    pub fn with_context(mut self, uri: &str, ctx: MockContext) -> Self {
        self.contexts.push((uri.to_string(), ctx));
        self
    }

    /// Handle to the shared call counters.
    pub fn counters(&self) -> Arc<MockCounters> {
        Arc::clone(&self.counters)
    }
}

impl Backend for MockBackend {
    fn scan(&self) -> Vec<String> {
        self.contexts.iter().map(|(uri, _)| uri.clone()).collect()
    }

    fn connect(&self, uri: &Uri) -> Result<Box<dyn Transport>> {
        let wanted = uri.to_string();
        for (known, ctx) in &self.contexts {
            if *known == wanted {
                return Ok(Box::new(MockTransport::with_counters(
                    ctx.clone(),
                    Arc::clone(&self.counters),
                )));
            }
        }
        Err(InstrumentError::Connection { uri: wanted })
    }
}

/// Build an M2K-shaped mock context: ADC with two voltage channels, two DAC
/// devices, a power-supply write/read device pair with mirrored rails, and
/// a logic-analyzer rx/tx device pair.
pub fn m2k_context() -> MockContext {
    let mut ctx = MockContext::new("M2K");

    ctx.add_device("m2k-adc");
    ctx.add_device_attr("m2k-adc", "calibrate", 0.0);
    // raw is in ADC codes, scale converts to millivolts
    ctx.add_input_channel(
        "m2k-adc",
        "voltage0",
        &[("raw", 1200.0), ("scale", 2.5), ("offset", 0.0)],
    );
    ctx.add_input_channel("m2k-adc", "voltage1", &[("raw", -400.0), ("scale", 2.5)]);

    ctx.add_device("m2k-dac-a");
    ctx.add_device_attr("m2k-dac-a", "calibrate", 0.0);
    ctx.add_output_channel("m2k-dac-a", "voltage0", &[("raw", 0.0), ("scale", 1.0)]);

    ctx.add_device("m2k-dac-b");
    ctx.add_output_channel("m2k-dac-b", "voltage0", &[("raw", 0.0), ("scale", 1.0)]);

    ctx.add_device("m2k-ps-dac");
    ctx.add_output_channel(
        "m2k-ps-dac",
        "voltage0",
        &[("raw", 0.0), ("scale", 1.0), ("powerdown", 1.0)],
    );
    ctx.add_output_channel(
        "m2k-ps-dac",
        "voltage1",
        &[("raw", 0.0), ("scale", 1.0), ("powerdown", 1.0)],
    );

    ctx.add_device("m2k-ps-adc");
    ctx.add_input_channel("m2k-ps-adc", "voltage0", &[("raw", 0.0), ("scale", 1.0)]);
    ctx.add_input_channel("m2k-ps-adc", "voltage1", &[("raw", 0.0), ("scale", 1.0)]);

    ctx.add_device("m2k-logic-analyzer-rx");
    ctx.add_device_attr("m2k-logic-analyzer-rx", "sampling_frequency", 100_000_000.0);
    ctx.add_input_channel("m2k-logic-analyzer-rx", "voltage0", &[("raw", 1.0)]);
    ctx.add_input_channel("m2k-logic-analyzer-rx", "voltage1", &[("raw", 0.0)]);

    ctx.add_device("m2k-logic-analyzer-tx");
    ctx.add_device_attr("m2k-logic-analyzer-tx", "sampling_frequency", 100_000_000.0);
    ctx.add_output_channel("m2k-logic-analyzer-tx", "voltage0", &[("raw", 0.0)]);
    ctx.add_output_channel("m2k-logic-analyzer-tx", "voltage1", &[("raw", 0.0)]);

    // Rail targets settle onto the monitoring ADC.
    ctx.link(
        ("m2k-ps-dac", "voltage0", "raw"),
        ("m2k-ps-adc", "voltage0", "raw"),
        1.0,
    );
    ctx.link(
        ("m2k-ps-dac", "voltage1", "raw"),
        ("m2k-ps-adc", "voltage1", "raw"),
        1.0,
    );

    ctx
}
