mod btleplug_backend;
mod fake_backend;
mod model;

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::trace;
use uuid::Uuid;

use crate::error::TransportError;

pub use self::btleplug_backend::BtleplugTransport;
pub use self::fake_backend::{
    ChunkFixture, DiscoveryBehaviour, FakeTransport, FakeTransportConfig, ReplyScript,
    TransportProbe,
};
pub(crate) use self::model::find_characteristic;
pub use self::model::{CharacteristicInfo, CharacteristicRef, ServiceInfo};

/// Status code attached to a transport callback.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, derive_more::Display)]
pub enum GattStatus {
    #[default]
    #[display("success")]
    Success,
    #[display("error {_0:#04x}")]
    Error(u8),
}

impl GattStatus {
    /// Generic failure code used when a backend reports no specific status.
    pub const GATT_ERROR: Self = Self::Error(0x85);

    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl From<u8> for GattStatus {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Success,
            other => Self::Error(other),
        }
    }
}

/// Link state reported by a connection-state callback.
#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display)]
pub enum LinkState {
    #[display("connected")]
    Connected,
    #[display("disconnected")]
    Disconnected,
}

/// One callback delivered by the transport for an open connection.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TransportEvent {
    ConnectionStateChanged {
        status: GattStatus,
        state: LinkState,
    },
    ServicesDiscovered {
        status: GattStatus,
        services: Vec<ServiceInfo>,
    },
    CharacteristicWritten {
        characteristic: Uuid,
        status: GattStatus,
    },
    CharacteristicChanged {
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

/// Callback side of the bridge between a transport and one session.
///
/// Once the owning session starts tearing down, the sink is closed and every
/// later callback is dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: mpsc::UnboundedSender<TransportEvent>,
    closed: Arc<AtomicBool>,
}

/// Receiving side of an [`EventSink`].
pub type EventStream = UnboundedReceiverStream<TransportEvent>;

impl EventSink {
    /// Creates a connected sink/stream pair.
    #[must_use]
    pub fn channel() -> (Self, EventStream) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let sink = Self {
            sender,
            closed: Arc::new(AtomicBool::new(false)),
        };
        (sink, UnboundedReceiverStream::new(receiver))
    }

    /// Delivers one callback. Returns `false` when the callback was dropped.
    pub fn emit(&self, event: TransportEvent) -> bool {
        if self.closed.load(Ordering::Acquire) {
            trace!(?event, "dropping transport callback after teardown");
            return false;
        }
        self.sender.send(event).is_ok()
    }

    /// Stops delivery of any further callbacks.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Opens connections to peers. Completion of every request is reported
/// through the [`EventSink`] handed to [`GattTransport::connect`].
#[async_trait]
pub trait GattTransport: Debug + Send + Sync {
    /// Starts connecting to `peer`. The returned handle is exclusively owned
    /// by the caller; a [`TransportEvent::ConnectionStateChanged`] reports
    /// whether the link came up.
    async fn connect(
        &self,
        peer: &str,
        events: EventSink,
    ) -> Result<Box<dyn GattConnection>, TransportError>;
}

/// One open connection to a peer.
#[async_trait]
pub trait GattConnection: Debug + Send + Sync {
    /// Requests service discovery; completes with [`TransportEvent::ServicesDiscovered`].
    async fn discover_services(&self) -> Result<(), TransportError>;

    /// Writes a descriptor of `target`.
    async fn write_descriptor(
        &self,
        target: &CharacteristicRef,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError>;

    /// Requests a characteristic write; completes with [`TransportEvent::CharacteristicWritten`].
    async fn write_characteristic(
        &self,
        target: &CharacteristicRef,
        value: &[u8],
    ) -> Result<(), TransportError>;

    /// Drops the link. Must tolerate an already-closed link.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Releases every resource held for this connection.
    async fn close(self: Box<Self>);
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tokio_stream::StreamExt;

    use super::*;

    #[rstest]
    #[case(0, GattStatus::Success)]
    #[case(0x85, GattStatus::GATT_ERROR)]
    #[case(8, GattStatus::Error(8))]
    fn status_codes_map_to_variants(#[case] code: u8, #[case] expected: GattStatus) {
        assert_eq!(expected, GattStatus::from(code));
    }

    #[test]
    fn error_status_renders_hex_code() {
        assert_eq!("error 0x85", GattStatus::GATT_ERROR.to_string());
    }

    #[tokio::test]
    async fn closed_sink_drops_late_callbacks() {
        let (sink, mut stream) = EventSink::channel();
        let connected = TransportEvent::ConnectionStateChanged {
            status: GattStatus::Success,
            state: LinkState::Connected,
        };

        assert!(sink.emit(connected.clone()));
        sink.close();
        assert!(!sink.emit(TransportEvent::ConnectionStateChanged {
            status: GattStatus::Success,
            state: LinkState::Disconnected,
        }));
        drop(sink);

        assert_eq!(Some(connected), stream.next().await);
        assert_eq!(None, stream.next().await);
    }
}
