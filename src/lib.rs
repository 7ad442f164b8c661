//! Hardware abstraction layer for USB-attached mixed-signal instruments.
//!
//! This crate sits between a generic industrial-I/O transport and a
//! high-level instrument API: it maps logical instrument capabilities
//! (analog input/output channels, power-supply rails, multimeter channels)
//! onto physical device and channel handles, performs single-sample and
//! buffered I/O, and identifies heterogeneous device models at runtime to
//! dispatch them to the correct capability set.
//!
//! # Architecture
//!
//! The layer is organized leaf-first:
//!
//! ## Transport
//! - [`Transport`] / [`Backend`] - the seam to the external I/O driver
//! - [`Session`] - arena-owned session over one open connection
//! - [`transport::mock`] - in-memory transport with call counters
//!
//! ## Capability groups
//! - [`Channel`] - one physical line, input or output
//! - [`AnalogIn`] / [`AnalogOut`] - single-sample and buffered analog I/O
//! - [`DigitalIn`] / [`DigitalOut`] - per-line levels on the logic devices
//! - [`PowerSupply`] - independently enabled rails with push/read
//! - [`Dmm`] - calibrated single-shot and all-channel scans
//!
//! ## Dispatch
//! - [`Registry`] / [`DeviceProfile`] - static model descriptions
//! - [`DeviceKind`] - the closed set of dispatched device types
//! - [`Context`] - the root object obtained by opening a URI
//!
//! # Concurrency
//!
//! Every call is synchronous and blocks until the transport exchange
//! completes; the layer spawns no threads and performs no retries. A
//! session serializes access to its non-reentrant transport handle, but
//! callers sharing one [`Context`] across threads must serialize their own
//! operation ordering.
//!
//! # Example
//!
//! ```
//! use iio_instrument::transport::mock::{m2k_context, MockBackend};
//! use iio_instrument::Context;
//!
//! # fn main() -> iio_instrument::Result<()> {
//! let backend = MockBackend::new().with_context("usb:1.5", m2k_context());
//!
//! let ctx = Context::open(&backend, "usb:1.5")?;
//! let dmm = &ctx.all_dmm()?[0];
//! let reading = dmm.read_channel("voltage0")?;
//! println!("{}: {:.3} {}", reading.channel, reading.value, reading.unit);
//!
//! let supply = ctx.power_supply()?;
//! supply.push_channel(0, -1.0)?;
//! supply.enable_channel(0, true)?;
//! let measured = supply.read_channel(0)?;
//! assert!((measured + 1.0).abs() < 0.01);
//! # Ok(())
//! # }
//! ```

pub mod analog;
pub mod channel;
pub mod context;
pub mod digital;
pub mod dispatch;
pub mod dmm;
pub mod error;
pub mod logger;
pub mod powersupply;
pub mod session;
pub mod transport;

pub use analog::{AnalogIn, AnalogOut};
pub use channel::Channel;
pub use context::{list_devices, Context};
pub use digital::{DigitalIn, DigitalOut};
pub use dispatch::{lookup_kind, DeviceKind, DeviceProfile, Registry};
pub use dmm::{Dmm, Reading};
pub use error::{InstrumentError, Result};
pub use powersupply::{PowerSupply, RailLimits};
pub use session::Session;
pub use transport::{
    Backend, ChannelCaps, ChannelDesc, ContextDesc, DeviceDesc, Direction, Transport, Uri,
};
