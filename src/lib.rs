mod app;
mod classify;
mod cli;
mod config;
mod error;
mod exchange;
mod payload;
mod protocol;
mod telemetry;
mod terminal;
mod transport;
mod utils;

pub use app::{
    DeviceInfoClient, fake_transport, real_transport, run, run_with_clients, run_with_log_level,
};
pub use classify::{AdoptionClassification, Classifier};
pub use cli::{
    Args, ClassifyArgs, Command, DEFAULT_FAKE_CHUNK_SIZE, FakeArgs, IdentityAction, IdentityArgs,
    LogLevel, OutputFormat, ProbeArgs, SessionSettings,
};
pub use config::{
    CommandProvider, DEFAULT_INACTIVITY_TIMEOUT, DEFAULT_OVERALL_TIMEOUT, DEFAULT_SETTLE_DELAY,
    ExchangeConfig, IdentityProvider, IdentityStore, StaticCommand, StaticIdentity,
};
pub use error::{ExchangeCancelled, FixtureError, IdentityError, PayloadError, TransportError};
pub use exchange::{ChunkReassembler, ProtocolSession, SessionEnd, SessionReport, SessionState};
pub use payload::{
    DeviceInfoPayload, FailureReason, PartialPayload, ProtocolOutcome, ScaleRow,
};
pub use protocol::{DEFAULT_DEVICE_INFO_COMMAND, ENABLE_NOTIFICATION_VALUE, EndpointId};
pub use terminal::TerminalClient;
pub use transport::{
    BtleplugTransport, CharacteristicInfo, CharacteristicRef, ChunkFixture, DiscoveryBehaviour,
    EventSink, EventStream, FakeTransport, FakeTransportConfig, GattConnection, GattStatus,
    GattTransport, LinkState, ReplyScript, ServiceInfo, TransportEvent, TransportProbe,
};
