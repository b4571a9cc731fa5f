//! Device registry (C4): a live `serial_number -> device_id` map kept in
//! sync from usbmuxd's `Listen` event stream.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{MuxError, Result};
use crate::usbmuxd::channel::ControlChannel;
use crate::usbmuxd::frame::{self, ConnectionType, DeviceEventFrame};
use crate::usbmuxd::{packet, UsbmuxdAddr};

/// Single writer (the listener task), many readers (dial calls). A
/// read-biased lock is used rather than an actor, since every update is a
/// point insert-or-remove keyed by serial with no cross-key invariant.
type Map = Arc<RwLock<HashMap<String, u32>>>;

/// What the listener does with a `Detached` event.
///
/// The daemon client this protocol was distilled from registers `Attached`
/// events but never acts on `Detached`, leaving stale mappings in place for
/// the listener's lifetime; whether that is intentional (device ids are
/// assumed stable enough that a dialer will simply fail downstream against a
/// daemon that has forgotten the id) or an oversight is left unresolved
/// upstream. This type makes the choice explicit instead of guessing:
/// [`DetachPolicy::Ignore`] reproduces the upstream behavior and is the
/// default; [`DetachPolicy::Remove`] is the opt-in hook for a caller that
/// wants stale mappings cleared eagerly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetachPolicy {
    /// Skip `Detached` events entirely, matching the reference daemon
    /// client's behavior. Stale mappings persist for the listener's
    /// lifetime.
    #[default]
    Ignore,
    /// Remove whichever serial currently maps to the detached device id, if
    /// any.
    Remove,
}

/// A live view of which serials are currently attached over USB.
///
/// Populated exclusively by a background task consuming a `Listen`
/// subscription. `Attached` events insert or replace the entry for their
/// serial. `Detached` events are handled per the registry's [`DetachPolicy`]
/// (ignored by default). Non-USB attachments are never inserted.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    map: Map,
    listener: Arc<JoinHandle<()>>,
}

impl DeviceRegistry {
    /// Opens a `Listen` control channel against `addr` and spawns the
    /// background task that keeps the registry in sync, ignoring `Detached`
    /// events (see [`DetachPolicy::Ignore`]).
    ///
    /// The returned registry's listener task runs until the control channel
    /// breaks; there is no automatic reconnection (see crate-level docs).
    pub async fn start(addr: UsbmuxdAddr) -> Result<Self> {
        Self::start_with_detach_policy(addr, DetachPolicy::default()).await
    }

    /// Like [`start`], but with an explicit [`DetachPolicy`].
    ///
    /// [`start`]: DeviceRegistry::start
    pub async fn start_with_detach_policy(
        addr: UsbmuxdAddr,
        detach_policy: DetachPolicy,
    ) -> Result<Self> {
        let req = frame::listen_request();
        let mut channel = ControlChannel::open(
            &addr,
            &req,
            packet::PLIST_PROTO_VERSION,
            packet::PLIST_PROTO_TYPE,
        )
        .await?;
        channel.send().await?;

        let map: Map = Arc::new(RwLock::new(HashMap::new()));
        let task_map = map.clone();

        let listener = tokio::spawn(async move {
            loop {
                let envelope = match channel.recv().await {
                    Ok(e) => e,
                    Err(e) => {
                        warn!(error = %e, "usbmuxd Listen channel broke, registry is now stale");
                        break;
                    }
                };

                match envelope.message_type.as_str() {
                    "Attached" => {
                        let event: DeviceEventFrame = match plist::from_bytes(&envelope.payload) {
                            Ok(e) => e,
                            Err(e) => {
                                warn!(error = %e, "malformed Attached event, terminating listener");
                                break;
                            }
                        };
                        let Some(props) = event.properties else {
                            warn!("Attached event with no Properties, terminating listener");
                            break;
                        };
                        if props.connection_type != ConnectionType::Usb {
                            continue;
                        }
                        debug!(serial = %props.serial_number, device_id = props.device_id, "device attached");
                        task_map
                            .write()
                            .await
                            .insert(props.serial_number, props.device_id);
                    }
                    "Detached" if detach_policy == DetachPolicy::Remove => {
                        let event: DeviceEventFrame = match plist::from_bytes(&envelope.payload) {
                            Ok(e) => e,
                            Err(e) => {
                                warn!(error = %e, "malformed Detached event, terminating listener");
                                break;
                            }
                        };
                        let device_id = event.device_id;
                        let mut map = task_map.write().await;
                        let serial = map
                            .iter()
                            .find(|(_, &id)| id == device_id)
                            .map(|(serial, _)| serial.clone());
                        if let Some(serial) = serial {
                            debug!(serial = %serial, device_id, "device detached");
                            map.remove(&serial);
                        }
                    }
                    _ => {
                        // Includes the initial `Result` acknowledgement and,
                        // under the default policy, every `Detached` event.
                        continue;
                    }
                }
            }
        });

        Ok(Self {
            map,
            listener: Arc::new(listener),
        })
    }

    /// Looks up the device id currently mapped to `serial`. Never blocks
    /// waiting for attachment: if the serial is absent at the instant of
    /// lookup, this returns [`MuxError::NotConnected`].
    pub async fn resolve(&self, serial: &str) -> Result<u32> {
        self.map
            .read()
            .await
            .get(serial)
            .copied()
            .ok_or_else(|| MuxError::NotConnected(serial.to_string()))
    }

    /// Whether the background listener task has exited, e.g. because its
    /// control channel broke. A dead registry keeps serving whatever it last
    /// saw; it never reconnects on its own.
    pub fn is_alive(&self) -> bool {
        !self.listener.is_finished()
    }

    /// Builds a registry with no listener task, for exercising [`resolve`]
    /// in isolation.
    ///
    /// [`resolve`]: DeviceRegistry::resolve
    #[cfg(test)]
    pub(crate) fn empty_for_test() -> Self {
        Self {
            map: Arc::new(RwLock::new(HashMap::new())),
            listener: Arc::new(tokio::spawn(async {})),
        }
    }
}
