//! Transport session: the arena that owns one open transport connection.
//!
//! A [`Session`] pairs the immutable context description (probed once at
//! open) with the live transport handle. The handle is non-reentrant, so
//! every exchange goes through a mutex; capability groups hold `Session`
//! clones plus plain indices into the description, never raw handles, which
//! guarantees the transport outlives every group that references it.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{InstrumentError, Result};
use crate::transport::{Backend, ChannelDesc, ContextDesc, DeviceDesc, Direction, Transport, Uri};

struct SessionInner {
    desc: ContextDesc,
    uri: Uri,
    /// Serializes all exchanges on the singly-owned, non-reentrant handle.
    transport: Mutex<Box<dyn Transport>>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        debug!(uri = %self.uri, "Closing transport session");
    }
}

/// A shared handle to one open transport connection.
///
/// Cloning is cheap and shares the same underlying connection; the
/// connection closes when the last clone drops.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Connect to `uri` through `backend` and probe the context structure.
    pub fn open(backend: &dyn Backend, uri: &Uri) -> Result<Self> {
        let transport = backend.connect(uri)?;
        let desc = transport.describe()?;

        info!(
            uri = %uri,
            hardware = %desc.hardware_name,
            devices = desc.devices.len(),
            "Opened transport session"
        );

        Ok(Self {
            inner: Arc::new(SessionInner {
                desc,
                uri: uri.clone(),
                transport: Mutex::new(transport),
            }),
        })
    }

    /// Execute a closure with exclusive access to the transport.
    ///
    /// All transport exchanges funnel through here; operations issued by a
    /// single caller execute in call order with no batching or reordering.
    pub(crate) fn with_transport<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut dyn Transport) -> R,
    {
        let mut guard = self.inner.transport.lock();
        f(guard.as_mut())
    }

    /// The URI this session was opened with.
    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    /// The hardware name the context declares.
    pub fn hardware_name(&self) -> &str {
        &self.inner.desc.hardware_name
    }

    /// The full context description.
    pub fn desc(&self) -> &ContextDesc {
        &self.inner.desc
    }

    /// Number of sub-devices on the context.
    pub fn device_count(&self) -> u32 {
        self.inner.desc.devices.len() as u32
    }

    /// Description of the sub-device at `index`.
    pub fn device(&self, index: u32) -> Result<&DeviceDesc> {
        self.inner
            .desc
            .devices
            .get(index as usize)
            .ok_or_else(|| InstrumentError::ResourceNotFound {
                what: format!("device index {index}"),
            })
    }

    /// Find a sub-device by name.
    pub fn find_device(&self, name: &str) -> Option<u32> {
        self.inner
            .desc
            .devices
            .iter()
            .position(|dev| dev.name == name)
            .map(|i| i as u32)
    }

    /// Description of one channel on one sub-device.
    pub fn channel(&self, device: u32, channel: u32) -> Result<&ChannelDesc> {
        self.device(device)?
            .channels
            .get(channel as usize)
            .ok_or_else(|| InstrumentError::ResourceNotFound {
                what: format!("channel index {channel}"),
            })
    }

    /// Find a channel on a sub-device by id or label, filtered by direction.
    pub fn find_channel(&self, device: u32, name: &str, direction: Direction) -> Option<u32> {
        let dev = self.inner.desc.devices.get(device as usize)?;
        dev.channels
            .iter()
            .position(|chn| {
                chn.direction == direction
                    && (chn.id == name || chn.name.as_deref() == Some(name))
            })
            .map(|i| i as u32)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("uri", &self.inner.uri.to_string())
            .field("hardware", &self.inner.desc.hardware_name)
            .field("devices", &self.inner.desc.devices.len())
            .finish()
    }
}
