//! End-to-end scenarios against the mock backend: open a device by URI or
//! auto-detect, resolve its capability profile, and exercise the DMM and
//! power-supply groups the way an instrument frontend would.

use iio_instrument::transport::mock::{m2k_context, MockBackend, MockContext};
use iio_instrument::{Context, DeviceKind, InstrumentError, RailLimits, Registry, Session};

fn m2k_backend() -> MockBackend {
    MockBackend::new().with_context("usb:1.5", m2k_context())
}

#[test]
fn open_usb_device_and_scan_dmm() {
    let backend = m2k_backend();
    let ctx = Context::open(&backend, "usb:1.5").unwrap();
    assert_eq!(ctx.kind(), DeviceKind::M2k);

    let dmms = ctx.all_dmm().unwrap();
    assert_eq!(dmms.len(), 1);
    let dmm = &dmms[0];
    assert_eq!(dmm.channels(), vec!["voltage0", "voltage1"]);

    let reading = dmm.read_channel("voltage0").unwrap();
    assert_eq!(reading.unit, "V");
    assert!(reading.value.is_finite());
    // Declared ADC range for the mock topology.
    assert!(reading.value.abs() <= 25.0);
}

#[test]
fn dmm_read_all_is_ordered_and_complete() {
    let backend = m2k_backend();
    let ctx = Context::open(&backend, "usb:1.5").unwrap();
    let dmm = ctx.dmm("m2k-adc").unwrap();

    let readings = dmm.read_all().unwrap();
    assert_eq!(readings.len(), dmm.channel_count());
    assert_eq!(readings[0].channel, "voltage0");
    assert_eq!(readings[1].channel, "voltage1");
    for reading in &readings {
        assert!(!reading.unit.is_empty());
        assert!(reading.value.is_finite());
    }
}

#[test]
fn dmm_unknown_channel_is_recoverable() {
    let backend = m2k_backend();
    let ctx = Context::open(&backend, "usb:1.5").unwrap();
    let dmm = ctx.dmm("m2k-adc").unwrap();

    let err = dmm.read_channel("unknown").unwrap_err();
    assert!(matches!(err, InstrumentError::ChannelNotFound { .. }));
    // Cached state is untouched: the next valid read still succeeds.
    assert!(dmm.read_channel("voltage0").is_ok());
}

#[test]
fn power_supply_closed_loop_and_boundary() {
    let backend = m2k_backend();
    let session = Session::open(&backend, &"usb:1.5".parse().unwrap()).unwrap();
    let limits = [
        RailLimits { min: -5.0, max: 5.0 },
        RailLimits { min: -2.0, max: 2.0 },
    ];
    let supply = iio_instrument::PowerSupply::new(
        session,
        Some("m2k-ps-dac"),
        Some("m2k-ps-adc"),
        &limits,
    )
    .unwrap();

    supply.push_channel(0, -1.0).unwrap();
    supply.enable_channel(0, true).unwrap();
    let measured = supply.read_channel(0).unwrap();
    assert!((measured - (-1.0)).abs() < 0.01);

    // The rail boundary itself is valid; beyond it must fail.
    supply.push_channel(1, -2.0).unwrap();
    let err = supply.push_channel(1, -2.001).unwrap_err();
    assert!(matches!(err, InstrumentError::OutOfRange { .. }));
}

#[test]
fn digital_lines_read_and_drive() {
    let backend = m2k_backend();
    let ctx = Context::open(&backend, "usb:1.5").unwrap();

    let din = ctx.digital_in().unwrap();
    assert_eq!(din.line_count(), 2);
    assert!(din.read_level(0).unwrap());
    assert!(!din.read_level(1).unwrap());

    let dout = ctx.digital_out().unwrap();
    dout.set_level(0, true).unwrap();
    dout.push_raw(0, &[0, 1, 1, 0]).unwrap();
    assert!(dout.set_level(9, true).unwrap_err().is_domain());
}

#[test]
fn out_of_range_indices_perform_no_transport_io() {
    let backend = m2k_backend();
    let counters = backend.counters();
    let ctx = Context::open(&backend, "usb:1.5").unwrap();
    let supply = ctx.power_supply().unwrap();

    let before = counters.io_total();
    assert!(supply.enable_channel(9, true).unwrap_err().is_domain());
    assert!(supply.push_channel(9, 0.5).unwrap_err().is_domain());
    assert!(supply.read_channel(9).unwrap_err().is_domain());
    assert_eq!(counters.io_total(), before);
}

#[test]
fn unknown_hardware_constructs_generic_context() {
    let mut unknown = MockContext::new("PLUTO-REV-B");
    unknown.add_device("ams");
    unknown.add_input_channel("ams", "temp0", &[("raw", 42000.0), ("scale", 1.0)]);
    let backend = MockBackend::new().with_context("usb:2.7", unknown);

    let ctx = Context::open(&backend, "usb:2.7").unwrap();
    assert_eq!(ctx.kind(), DeviceKind::Other);
    assert!(ctx.profile().is_none());
    assert!(ctx.power_supply().unwrap_err().is_not_found());
    assert!(ctx.analog_in().unwrap_err().is_not_found());
    assert!(ctx.analog_out().unwrap_err().is_not_found());
    assert!(ctx.digital_in().unwrap_err().is_not_found());
}

#[test]
fn auto_detect_skips_dead_candidates() {
    // scan() lists both URIs but only the second answers.
    let backend = MockBackend::new().with_context("usb:1.9", m2k_context());
    let dead_first = FlakyBackend { inner: backend };

    let ctx = Context::open(&dead_first, "").unwrap();
    assert_eq!(ctx.uri(), "usb:1.9");
}

/// Backend whose scan advertises one candidate that never answers.
struct FlakyBackend {
    inner: MockBackend,
}

impl iio_instrument::Backend for FlakyBackend {
    fn scan(&self) -> Vec<String> {
        let mut uris = vec!["usb:0.1".to_string()];
        uris.extend(self.inner.scan());
        uris
    }

    fn connect(
        &self,
        uri: &iio_instrument::Uri,
    ) -> iio_instrument::Result<Box<dyn iio_instrument::Transport>> {
        self.inner.connect(uri)
    }
}

#[test]
fn registry_profiles_extend_classification() {
    let mut registry = Registry::builtin().unwrap();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("xadc.toml"),
        r#"
[[profile]]
name = "XADC"
kind = "other"
compatible-devices = ["xadc"]
"#,
    )
    .unwrap();
    registry.load_dir(dir.path()).unwrap();

    let mut board = MockContext::new("ZYNQ");
    board.add_device("xadc");
    board.add_input_channel("xadc", "voltage0", &[("raw", 900.0), ("scale", 1.0)]);
    let backend = MockBackend::new().with_context("ip:10.0.0.7", board);

    let ctx = Context::open_with_registry(&backend, "ip:10.0.0.7", &registry).unwrap();
    assert_eq!(ctx.profile().unwrap().name, "XADC");
    assert_eq!(ctx.kind(), DeviceKind::Other);
}
