//! Context: the root object obtained by opening a URI.
//!
//! A context owns the transport session and lazily builds the capability
//! groups the resolved device type supports. Each group is created at most
//! once per context and cached; group fields are declared before the
//! session so they are torn down first, preserving the documented
//! destruction order (groups die before the transport).

use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::OnceCell;
use tracing::info;

use crate::analog::{AnalogIn, AnalogOut};
use crate::digital::{DigitalIn, DigitalOut};
use crate::dispatch::{lookup_kind, DeviceKind, DeviceProfile, Registry};
use crate::dmm::Dmm;
use crate::error::{InstrumentError, Result};
use crate::logger;
use crate::powersupply::PowerSupply;
use crate::session::Session;
use crate::transport::{Backend, ChannelCaps, Direction, Uri};

/// Enumerate URIs of all visible contexts on a backend.
///
/// Order is backend-defined and not guaranteed stable across runs.
pub fn list_devices(backend: &dyn Backend) -> Vec<String> {
    backend.scan()
}

/// An open instrument: transport session plus lazily built capability
/// groups.
pub struct Context {
    power_supply: OnceCell<PowerSupply>,
    analog_in: OnceCell<AnalogIn>,
    analog_out: OnceCell<AnalogOut>,
    digital_in: OnceCell<DigitalIn>,
    digital_out: OnceCell<DigitalOut>,
    dmms: OnceCell<Vec<Dmm>>,
    adc_calibrated: AtomicBool,
    dac_calibrated: AtomicBool,
    kind: DeviceKind,
    profile: Option<DeviceProfile>,
    session: Session,
}

impl Context {
    /// Open the context at `uri`, resolving its device type against the
    /// built-in profile registry.
    ///
    /// An empty `uri` auto-detects: every visible context is tried in scan
    /// order and the first one that answers is used. Fails with
    /// [`InstrumentError::Connection`] when nothing answers.
    pub fn open(backend: &dyn Backend, uri: &str) -> Result<Self> {
        Self::open_with_registry(backend, uri, &Registry::builtin()?)
    }

    /// Open the context at `uri`, resolving against a caller-supplied
    /// registry.
    pub fn open_with_registry(backend: &dyn Backend, uri: &str, registry: &Registry) -> Result<Self> {
        let parsed: Uri = uri.parse()?;
        let session = match parsed {
            Uri::Auto => open_first_candidate(backend)?,
            ref concrete => Session::open(backend, concrete)?,
        };

        let profile = registry.classify(session.desc()).cloned();
        let kind = profile
            .as_ref()
            .map(|p| p.kind)
            .or_else(|| lookup_kind(session.hardware_name()))
            .unwrap_or(DeviceKind::Other);
        if kind == DeviceKind::Other {
            logger::warn(&format!(
                "unrecognized hardware '{}': constructing generic context",
                session.hardware_name()
            ));
        }

        info!(uri = %session.uri(), kind = ?kind, "Constructed context");

        Ok(Self {
            power_supply: OnceCell::new(),
            analog_in: OnceCell::new(),
            analog_out: OnceCell::new(),
            digital_in: OnceCell::new(),
            digital_out: OnceCell::new(),
            dmms: OnceCell::new(),
            adc_calibrated: AtomicBool::new(false),
            dac_calibrated: AtomicBool::new(false),
            kind,
            profile,
            session,
        })
    }

    /// The URI this context was opened with.
    pub fn uri(&self) -> String {
        self.session.uri().to_string()
    }

    /// The hardware name the context declares.
    pub fn hardware_name(&self) -> &str {
        self.session.hardware_name()
    }

    /// The resolved device kind.
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// The matched capability profile, when one matched.
    pub fn profile(&self) -> Option<&DeviceProfile> {
        self.profile.as_ref()
    }

    /// The underlying transport session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The power supply group. Built on first call, cached afterwards.
    ///
    /// Generic contexts expose no specialized groups; this fails with
    /// [`InstrumentError::DeviceNotFound`] on [`DeviceKind::Other`].
    pub fn power_supply(&self) -> Result<&PowerSupply> {
        self.require_specialized("power supply")?;
        self.power_supply.get_or_try_init(|| {
            match self.profile.as_ref().and_then(|p| p.power_supply.as_ref()) {
                Some(spec) => PowerSupply::new(
                    self.session.clone(),
                    Some(&spec.write_device),
                    Some(&spec.read_device),
                    &spec.rail_limits(),
                ),
                None => PowerSupply::new(self.session.clone(), None, None, &[]),
            }
        })
    }

    /// The analog input group. Built on first call, cached afterwards.
    pub fn analog_in(&self) -> Result<&AnalogIn> {
        self.require_specialized("analog input")?;
        self.analog_in
            .get_or_try_init(|| AnalogIn::discover(self.session.clone()))
    }

    /// The analog output group. Built on first call, cached afterwards.
    pub fn analog_out(&self) -> Result<&AnalogOut> {
        self.require_specialized("analog output")?;
        self.analog_out
            .get_or_try_init(|| AnalogOut::discover(self.session.clone()))
    }

    /// The digital input group. Built on first call, cached afterwards.
    pub fn digital_in(&self) -> Result<&DigitalIn> {
        self.require_specialized("digital input")?;
        self.digital_in
            .get_or_try_init(|| DigitalIn::discover(self.session.clone()))
    }

    /// The digital output group. Built on first call, cached afterwards.
    pub fn digital_out(&self) -> Result<&DigitalOut> {
        self.require_specialized("digital output")?;
        self.digital_out
            .get_or_try_init(|| DigitalOut::discover(self.session.clone()))
    }

    /// Every multimeter on the context, in device order.
    ///
    /// Profiles pin down which sub-devices are multimeters; without a
    /// profile the context is scanned structurally, since the DMM is a
    /// generic capability even on unknown hardware.
    pub fn all_dmm(&self) -> Result<&[Dmm]> {
        let dmms = self.dmms.get_or_try_init(|| {
            match self.profile.as_ref().filter(|p| !p.dmm_devices.is_empty()) {
                Some(profile) => profile
                    .dmm_devices
                    .iter()
                    .map(|name| Dmm::new(self.session.clone(), name))
                    .collect::<Result<Vec<_>>>(),
                None => self.scan_dmm_devices(),
            }
        })?;
        Ok(dmms)
    }

    /// The multimeter backed by the named sub-device.
    pub fn dmm(&self, name: &str) -> Result<&Dmm> {
        self.all_dmm()?
            .iter()
            .find(|dmm| dmm.name() == name)
            .ok_or_else(|| InstrumentError::DeviceNotFound {
                name: name.to_string(),
            })
    }

    /// Calibrate the analog input path. One-shot and blocking: the call
    /// completes (success or failure) before dependent reads are valid as
    /// calibrated values. Reads performed before calibration are valid,
    /// raw-scaled results.
    pub fn calibrate_adc(&self) -> Result<()> {
        self.calibrate(Direction::Input)?;
        self.adc_calibrated.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Calibrate the analog output path. Same semantics as
    /// [`Context::calibrate_adc`].
    pub fn calibrate_dac(&self) -> Result<()> {
        self.calibrate(Direction::Output)?;
        self.dac_calibrated.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Whether [`Context::calibrate_adc`] has completed successfully.
    pub fn is_adc_calibrated(&self) -> bool {
        self.adc_calibrated.load(Ordering::SeqCst)
    }

    /// Whether [`Context::calibrate_dac`] has completed successfully.
    pub fn is_dac_calibrated(&self) -> bool {
        self.dac_calibrated.load(Ordering::SeqCst)
    }

    fn require_specialized(&self, what: &str) -> Result<()> {
        if self.kind == DeviceKind::Other {
            return Err(InstrumentError::DeviceNotFound {
                name: what.to_string(),
            });
        }
        Ok(())
    }

    fn scan_dmm_devices(&self) -> Result<Vec<Dmm>> {
        let mut dmms = Vec::new();
        for index in 0..self.session.device_count() {
            let desc = self.session.device(index)?;
            let qualifies = desc
                .channels
                .iter()
                .any(|chn| chn.direction == Direction::Input && chn.caps.is_sampled());
            if qualifies {
                dmms.push(Dmm::new(self.session.clone(), &desc.name.clone())?);
            }
        }
        Ok(dmms)
    }

    fn calibrate(&self, direction: Direction) -> Result<()> {
        // Kick every calibration-capable device on the wanted path; models
        // without the control are calibrated at the factory and the flag
        // alone is latched.
        for index in 0..self.session.device_count() {
            let desc = self.session.device(index)?;
            let on_path = desc.channels.iter().any(|chn| {
                chn.direction == direction && chn.caps.contains(ChannelCaps::RAW)
            });
            if on_path && desc.has_attr("calibrate") {
                self.session
                    .with_transport(|t| t.write_device_attr(index, "calibrate", 1.0))?;
            }
        }
        Ok(())
    }
}

fn open_first_candidate(backend: &dyn Backend) -> Result<Session> {
    let candidates = backend.scan();
    for candidate in &candidates {
        let parsed: Uri = match candidate.parse() {
            Ok(uri) => uri,
            Err(_) => continue,
        };
        match Session::open(backend, &parsed) {
            Ok(session) => return Ok(session),
            Err(err) => {
                logger::warn(&format!("auto-detect: skipping '{candidate}': {err}"));
            }
        }
    }
    Err(InstrumentError::Connection {
        uri: "auto".to_string(),
    })
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("uri", &self.uri())
            .field("hardware", &self.hardware_name())
            .field("kind", &self.kind)
            .finish()
    }
}
