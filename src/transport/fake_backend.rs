use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::model::{CharacteristicInfo, CharacteristicRef, ServiceInfo};
use super::{EventSink, GattConnection, GattStatus, GattTransport, LinkState, TransportEvent};
use crate::error::{FixtureError, TransportError};
use crate::protocol::EndpointId;

/// Parsed comma-separated hex chunks.
#[derive(Debug, Clone, Eq, PartialEq, derive_more::Into)]
pub struct ChunkFixture {
    chunks: Vec<Vec<u8>>,
}

impl FromStr for ChunkFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let chunks = value
            .split(',')
            .map(parse_hex_chunk)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { chunks })
    }
}

/// How the fake peer answers a service-discovery request.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, clap::ValueEnum)]
pub enum DiscoveryBehaviour {
    #[default]
    Completes,
    Fails,
    Never,
}

/// Notification chunks the fake peer sends after a successful command write.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ReplyScript {
    chunks: Vec<Vec<u8>>,
}

impl ReplyScript {
    /// Splits `text` into `chunk_size`-byte notifications.
    ///
    /// # Errors
    ///
    /// Returns an error when `chunk_size` is zero.
    pub fn from_text(text: &str, chunk_size: usize) -> Result<Self, FixtureError> {
        if chunk_size == 0 {
            return Err(FixtureError::ZeroChunkSize);
        }
        Ok(Self {
            chunks: text
                .as_bytes()
                .chunks(chunk_size)
                .map(<[u8]>::to_vec)
                .collect(),
        })
    }

    #[must_use]
    pub fn from_chunks(chunks: Vec<Vec<u8>>) -> Self {
        Self { chunks }
    }

    #[must_use]
    pub fn chunks(&self) -> &[Vec<u8>] {
        &self.chunks
    }
}

impl From<ChunkFixture> for ReplyScript {
    fn from(fixture: ChunkFixture) -> Self {
        Self::from_chunks(fixture.into())
    }
}

/// Behaviour of the scripted fake transport.
#[derive(Debug, Clone, Builder)]
pub struct FakeTransportConfig {
    #[builder(default)]
    reply: ReplyScript,
    #[builder(default = Duration::from_millis(50))]
    chunk_interval: Duration,
    #[builder(default)]
    connect_delay: Duration,
    #[builder(default, into)]
    connect_status: GattStatus,
    #[builder(default)]
    discovery: DiscoveryBehaviour,
    #[builder(default)]
    discovery_delay: Duration,
    #[builder(default = true)]
    include_cccd: bool,
    services: Option<Vec<ServiceInfo>>,
    #[builder(default, into)]
    write_status: GattStatus,
    disconnect_after_chunks: Option<usize>,
}

impl FakeTransportConfig {
    fn services(&self) -> Vec<ServiceInfo> {
        self.services
            .clone()
            .unwrap_or_else(|| default_services(self.include_cccd))
    }
}

/// Counters recorded by the fake transport.
#[derive(Debug, Clone, Default)]
pub struct TransportProbe {
    inner: Arc<ProbeCounters>,
}

#[derive(Debug, Default)]
struct ProbeCounters {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    closes: AtomicUsize,
    descriptor_writes: AtomicUsize,
    dropped_callbacks: AtomicUsize,
    writes: Mutex<Vec<Vec<u8>>>,
}

impl TransportProbe {
    #[must_use]
    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn disconnects(&self) -> usize {
        self.inner.disconnects.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn closes(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn descriptor_writes(&self) -> usize {
        self.inner.descriptor_writes.load(Ordering::SeqCst)
    }

    /// Callbacks the fake tried to deliver after the session closed its sink.
    #[must_use]
    pub fn dropped_callbacks(&self) -> usize {
        self.inner.dropped_callbacks.load(Ordering::SeqCst)
    }

    /// Payloads written to the device-info characteristic, in order.
    #[must_use]
    pub fn writes(&self) -> Vec<Vec<u8>> {
        match self.inner.writes.lock() {
            Ok(writes) => writes.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record_write(&self, payload: &[u8]) {
        match self.inner.writes.lock() {
            Ok(mut writes) => writes.push(payload.to_vec()),
            Err(poisoned) => poisoned.into_inner().push(payload.to_vec()),
        }
    }

    fn emit(&self, sink: &EventSink, event: TransportEvent) {
        if !sink.emit(event) {
            self.inner.dropped_callbacks.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Scripted transport used in tests and non-hardware environments.
#[derive(Debug)]
pub struct FakeTransport {
    config: Arc<FakeTransportConfig>,
    probe: TransportProbe,
}

impl FakeTransport {
    #[must_use]
    pub fn new(config: FakeTransportConfig) -> Self {
        Self {
            config: Arc::new(config),
            probe: TransportProbe::default(),
        }
    }

    /// Returns a handle to the counters shared with every connection.
    #[must_use]
    pub fn probe(&self) -> TransportProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl GattTransport for FakeTransport {
    #[instrument(skip(self, events), level = "debug")]
    async fn connect(
        &self,
        peer: &str,
        events: EventSink,
    ) -> Result<Box<dyn GattConnection>, TransportError> {
        self.probe.inner.connects.fetch_add(1, Ordering::SeqCst);
        let tasks = CancellationToken::new();

        let status = self.config.connect_status;
        let delay = self.config.connect_delay;
        let probe = self.probe.clone();
        let sink = events.clone();
        spawn_scripted(&tasks, async move {
            sleep(delay).await;
            let state = if status.is_success() {
                LinkState::Connected
            } else {
                LinkState::Disconnected
            };
            probe.emit(&sink, TransportEvent::ConnectionStateChanged { status, state });
        });

        Ok(Box::new(FakeConnection {
            config: Arc::clone(&self.config),
            probe: self.probe.clone(),
            events,
            tasks,
        }))
    }
}

#[derive(Debug)]
struct FakeConnection {
    config: Arc<FakeTransportConfig>,
    probe: TransportProbe,
    events: EventSink,
    tasks: CancellationToken,
}

impl FakeConnection {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.tasks.is_cancelled() {
            return Err(TransportError::ConnectionClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl GattConnection for FakeConnection {
    #[instrument(skip(self), level = "trace")]
    async fn discover_services(&self) -> Result<(), TransportError> {
        self.ensure_open()?;
        let event = match self.config.discovery {
            DiscoveryBehaviour::Completes => TransportEvent::ServicesDiscovered {
                status: GattStatus::Success,
                services: self.config.services(),
            },
            DiscoveryBehaviour::Fails => TransportEvent::ServicesDiscovered {
                status: GattStatus::GATT_ERROR,
                services: Vec::new(),
            },
            DiscoveryBehaviour::Never => {
                debug!("fake peer will never finish service discovery");
                return Ok(());
            }
        };

        let delay = self.config.discovery_delay;
        let probe = self.probe.clone();
        let sink = self.events.clone();
        spawn_scripted(&self.tasks, async move {
            sleep(delay).await;
            probe.emit(&sink, event);
        });
        Ok(())
    }

    #[instrument(skip(self, _value), level = "trace", fields(%descriptor))]
    async fn write_descriptor(
        &self,
        target: &CharacteristicRef,
        descriptor: Uuid,
        _value: &[u8],
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let known = super::model::find_characteristic(&self.config.services(), target)
            .is_some_and(|characteristic| characteristic.has_descriptor(descriptor));
        if !known {
            return Err(TransportError::UnknownDescriptor {
                characteristic: target.characteristic,
                descriptor,
            });
        }
        self.probe
            .inner
            .descriptor_writes
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    #[instrument(skip(self, value), level = "trace", fields(value_len = value.len()))]
    async fn write_characteristic(
        &self,
        target: &CharacteristicRef,
        value: &[u8],
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.probe.record_write(value);

        let characteristic = target.characteristic;
        let status = self.config.write_status;
        let chunks = self.config.reply.chunks().to_vec();
        let interval = self.config.chunk_interval;
        let disconnect_after = self.config.disconnect_after_chunks;
        let probe = self.probe.clone();
        let sink = self.events.clone();
        spawn_scripted(&self.tasks, async move {
            probe.emit(
                &sink,
                TransportEvent::CharacteristicWritten {
                    characteristic,
                    status,
                },
            );
            if !status.is_success() {
                return;
            }

            for (index, value) in chunks.into_iter().enumerate() {
                sleep(interval).await;
                probe.emit(
                    &sink,
                    TransportEvent::CharacteristicChanged {
                        characteristic,
                        value,
                    },
                );
                if disconnect_after == Some(index + 1) {
                    probe.emit(
                        &sink,
                        TransportEvent::ConnectionStateChanged {
                            status: GattStatus::Success,
                            state: LinkState::Disconnected,
                        },
                    );
                    return;
                }
            }
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.probe.inner.disconnects.fetch_add(1, Ordering::SeqCst);
        self.tasks.cancel();
        // Real stacks report our own disconnect back as a late callback.
        self.probe.emit(
            &self.events,
            TransportEvent::ConnectionStateChanged {
                status: GattStatus::Success,
                state: LinkState::Disconnected,
            },
        );
        Ok(())
    }

    async fn close(self: Box<Self>) {
        self.tasks.cancel();
        self.probe.inner.closes.fetch_add(1, Ordering::SeqCst);
    }
}

fn spawn_scripted<F>(tasks: &CancellationToken, script: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let tasks = tasks.clone();
    tokio::spawn(async move {
        tokio::select! {
            biased;
            () = tasks.cancelled() => {}
            () = script => {}
        }
    });
}

fn parse_hex_chunk(raw_value: &str) -> Result<Vec<u8>, FixtureError> {
    let cleaned: String = raw_value.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return Err(FixtureError::EmptyChunk);
    }
    hex::decode(&cleaned).map_err(|source| FixtureError::InvalidHex {
        value: cleaned,
        source,
    })
}

fn default_services(include_cccd: bool) -> Vec<ServiceInfo> {
    let descriptors = if include_cccd {
        vec![EndpointId::ClientCharacteristicConfiguration.uuid()]
    } else {
        Vec::new()
    };

    vec![ServiceInfo::new(
        EndpointId::DeviceInfoService.uuid(),
        true,
        vec![CharacteristicInfo::new(
            EndpointId::DeviceInfoCharacteristic.uuid(),
            vec!["notify".to_string(), "write".to_string()],
            descriptors,
        )],
    )]
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("7b7d", vec![b"{}".to_vec()])]
    #[case("7b, 7d", vec![b"{".to_vec(), b"}".to_vec()])]
    #[case("7B 22 61 22", vec![b"{\"a\"".to_vec()])]
    fn chunk_fixture_parses_hex_chunks(#[case] raw: &str, #[case] expected: Vec<Vec<u8>>) {
        let fixture: ChunkFixture = raw.parse().expect("fixture should parse");
        assert_eq!(expected, Vec::<Vec<u8>>::from(fixture));
    }

    #[rstest]
    #[case("7b,,7d")]
    #[case("")]
    fn chunk_fixture_rejects_empty_chunks(#[case] raw: &str) {
        assert_matches!(raw.parse::<ChunkFixture>(), Err(FixtureError::EmptyChunk));
    }

    #[test]
    fn chunk_fixture_rejects_odd_length() {
        assert_matches!(
            "7b7".parse::<ChunkFixture>(),
            Err(FixtureError::InvalidHex { .. })
        );
    }

    #[test]
    fn reply_script_splits_text_by_chunk_size() {
        let script = ReplyScript::from_text("abcdefg", 3).expect("chunk size is valid");
        assert_eq!(
            &[b"abc".to_vec(), b"def".to_vec(), b"g".to_vec()],
            script.chunks()
        );
    }

    #[test]
    fn reply_script_rejects_zero_chunk_size() {
        assert_matches!(
            ReplyScript::from_text("{}", 0),
            Err(FixtureError::ZeroChunkSize)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_reports_late_callback_as_dropped_once_sink_is_closed() {
        let transport = FakeTransport::new(FakeTransportConfig::builder().build());
        let probe = transport.probe();
        let (sink, _events) = EventSink::channel();

        let connection = transport
            .connect("AA:BB:CC:DD:EE:FF", sink.clone())
            .await
            .expect("fake connect should succeed");
        sink.close();
        connection
            .disconnect()
            .await
            .expect("fake disconnect should succeed");
        connection.close().await;

        assert_eq!(1, probe.connects());
        assert_eq!(1, probe.disconnects());
        assert_eq!(1, probe.closes());
        assert_eq!(1, probe.dropped_callbacks());
    }
}
