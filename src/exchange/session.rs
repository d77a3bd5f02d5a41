use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use strum_macros::Display;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use super::reassembler::ChunkReassembler;
use super::supervisor::{ConnectionGuard, ExchangeTimers, Guarded, TimerFired, guarded};
use crate::config::ExchangeConfig;
use crate::payload::{FailureReason, PartialPayload, ProtocolOutcome};
use crate::protocol::{ENABLE_NOTIFICATION_VALUE, EndpointId, endpoint_metadata};
use crate::transport::{
    CharacteristicRef, EventSink, EventStream, GattConnection, GattStatus, GattTransport,
    LinkState, ServiceInfo, TransportEvent, find_characteristic,
};

/// Progress of one exchange.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    Connecting,
    DiscoveringServices,
    AwaitingCharacteristic,
    NotificationsEnabling,
    WritePending,
    AwaitingChunks,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// How a session ended.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SessionEnd {
    Outcome(ProtocolOutcome),
    Cancelled,
}

/// Summary of one finished session.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SessionReport {
    state: SessionState,
    chunks: usize,
    bytes: usize,
    elapsed: Duration,
}

impl SessionReport {
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Notification chunks accepted after the command write.
    #[must_use]
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    #[must_use]
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// One single-use device-info exchange with one peer.
///
/// The session owns its connection exclusively and releases it exactly once
/// before [`ProtocolSession::run`] returns, on every path.
#[derive(Debug, Builder)]
pub struct ProtocolSession {
    transport: Arc<dyn GattTransport>,
    #[builder(into)]
    peer: String,
    target: CharacteristicRef,
    #[builder(into)]
    command: Vec<u8>,
    #[builder(default)]
    config: ExchangeConfig,
}

impl ProtocolSession {
    /// Runs the exchange to completion or cancellation.
    #[instrument(
        skip(self, cancel),
        level = "debug",
        fields(peer = %self.peer, characteristic = %self.target.characteristic)
    )]
    pub async fn run(self, cancel: CancellationToken) -> (SessionEnd, SessionReport) {
        let started = Instant::now();
        let mut exchange = Exchange::new(&self);
        let (sink, events) = EventSink::channel();

        let end = exchange.drive(sink, events, &cancel).await;
        exchange.teardown().await;

        let state = match &end {
            SessionEnd::Outcome(ProtocolOutcome::Failure(_)) => SessionState::Failed,
            SessionEnd::Outcome(_) => SessionState::Completed,
            SessionEnd::Cancelled => SessionState::Cancelled,
        };
        exchange.transition(state);

        let report = SessionReport {
            state,
            chunks: exchange.reassembler.chunk_count(),
            bytes: exchange.reassembler.len(),
            elapsed: started.elapsed(),
        };
        match &end {
            SessionEnd::Outcome(outcome) => info!(
                outcome = outcome.label(),
                chunks = report.chunks,
                bytes = report.bytes,
                elapsed = %humantime::format_duration(report.elapsed),
                "device-info exchange finished"
            ),
            SessionEnd::Cancelled => info!(
                chunks = report.chunks,
                elapsed = %humantime::format_duration(report.elapsed),
                "device-info exchange cancelled"
            ),
        }
        (end, report)
    }
}

#[derive(Debug)]
enum Wake {
    Cancelled,
    Timer(TimerFired),
    Event(Option<TransportEvent>),
}

/// Result of handling one wake-up.
#[derive(Debug)]
enum Step {
    Continue,
    Finish(SessionEnd),
}

impl Step {
    fn fail(reason: FailureReason) -> Self {
        Self::Finish(SessionEnd::Outcome(ProtocolOutcome::Failure(reason)))
    }
}

/// Maps an interrupted transport request onto the step that ends the session.
fn completed<T>(request: Guarded<T>) -> Result<T, Step> {
    match request {
        Guarded::Done(output) => Ok(output),
        Guarded::Cancelled => Err(Step::Finish(SessionEnd::Cancelled)),
        Guarded::TimedOut => Err(Step::fail(FailureReason::Timeout)),
    }
}

#[derive(Debug)]
struct Exchange<'a> {
    session: &'a ProtocolSession,
    state: SessionState,
    timers: ExchangeTimers,
    reassembler: ChunkReassembler,
    guard: Option<ConnectionGuard>,
    write_issued: bool,
}

impl<'a> Exchange<'a> {
    fn new(session: &'a ProtocolSession) -> Self {
        Self {
            session,
            state: SessionState::Connecting,
            timers: ExchangeTimers::start(
                session.config.overall_timeout(),
                session.config.inactivity_timeout(),
            ),
            reassembler: ChunkReassembler::new(),
            guard: None,
            write_issued: false,
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "session state changed");
            self.state = next;
        }
    }

    async fn drive(
        &mut self,
        sink: EventSink,
        mut events: EventStream,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        let session = self.session;
        let connect = session.transport.connect(&session.peer, sink.clone());
        let connection = match guarded(cancel, self.timers.overall_deadline(), connect).await {
            Guarded::Done(Ok(connection)) => connection,
            Guarded::Done(Err(error)) => {
                debug!(%error, "transport refused to open a connection");
                return SessionEnd::Outcome(ProtocolOutcome::Failure(
                    FailureReason::ConnectionFailed,
                ));
            }
            Guarded::Cancelled => return SessionEnd::Cancelled,
            Guarded::TimedOut => {
                return SessionEnd::Outcome(ProtocolOutcome::Failure(FailureReason::Timeout));
            }
        };
        self.guard = Some(ConnectionGuard::new(connection, sink));

        loop {
            let expiry = self.timers.expiry();
            let wake = tokio::select! {
                biased;
                () = cancel.cancelled() => Wake::Cancelled,
                fired = expiry => Wake::Timer(fired),
                event = events.next() => Wake::Event(event),
            };

            let step = match wake {
                Wake::Cancelled => Step::Finish(SessionEnd::Cancelled),
                Wake::Timer(fired) => self.on_timer(fired, cancel).await,
                Wake::Event(Some(event)) => self.on_event(event, cancel).await,
                Wake::Event(None) => Step::fail(FailureReason::SessionAborted),
            };
            if let Step::Finish(end) = step {
                return end;
            }
        }
    }

    async fn teardown(&mut self) {
        if let Some(guard) = self.guard.as_mut()
            && guard.release().await
        {
            debug!(state = %self.state, "connection released");
        }
    }

    async fn on_timer(&mut self, fired: TimerFired, cancel: &CancellationToken) -> Step {
        match fired {
            TimerFired::Overall => {
                debug!(state = %self.state, "overall deadline passed");
                Step::fail(FailureReason::Timeout)
            }
            TimerFired::Inactivity => self.finish_on_inactivity(),
            TimerFired::Settle => {
                self.timers.disarm_settle();
                self.write_command(cancel).await
            }
        }
    }

    fn finish_on_inactivity(&self) -> Step {
        debug!(
            buffered = self.reassembler.len(),
            inactivity_armed = self.timers.is_inactivity_armed(),
            "no reply chunk within the inactivity window"
        );
        if self.reassembler.is_empty() {
            return Step::fail(FailureReason::NoDataReceived);
        }

        let partial = PartialPayload::new(self.reassembler.text(), self.reassembler.len());
        Step::Finish(SessionEnd::Outcome(ProtocolOutcome::Partial(partial)))
    }

    async fn on_event(&mut self, event: TransportEvent, cancel: &CancellationToken) -> Step {
        match event {
            TransportEvent::ConnectionStateChanged { status, state } => {
                self.on_connection_state(status, state, cancel).await
            }
            TransportEvent::ServicesDiscovered { status, services } => {
                self.on_services_discovered(status, &services, cancel).await
            }
            TransportEvent::CharacteristicWritten {
                characteristic,
                status,
            } => self.on_written(characteristic, status),
            TransportEvent::CharacteristicChanged {
                characteristic,
                value,
            } => self.on_chunk(characteristic, &value),
        }
    }

    async fn on_connection_state(
        &mut self,
        status: GattStatus,
        state: LinkState,
        cancel: &CancellationToken,
    ) -> Step {
        let connecting = self.state == SessionState::Connecting;
        match (state, status.is_success()) {
            (LinkState::Connected, true) if connecting => {
                self.transition(SessionState::DiscoveringServices);
                self.request_discovery(cancel).await
            }
            (LinkState::Connected, true) => {
                trace!(state = %self.state, "ignoring repeated connected callback");
                Step::Continue
            }
            _ if connecting => {
                debug!(%status, %state, "connection attempt failed");
                Step::fail(FailureReason::ConnectionFailed)
            }
            _ => {
                debug!(%status, %state, from = %self.state, "link dropped mid-session");
                Step::fail(FailureReason::DeviceDisconnected)
            }
        }
    }

    async fn request_discovery(&mut self, cancel: &CancellationToken) -> Step {
        let Some(connection) = self.connection() else {
            return Step::fail(FailureReason::SessionAborted);
        };
        let request = connection.discover_services();
        let result = completed(guarded(cancel, self.timers.overall_deadline(), request).await);
        match result {
            Ok(Ok(())) => Step::Continue,
            Ok(Err(error)) => {
                debug!(%error, "service discovery request failed");
                Step::fail(FailureReason::ServiceDiscoveryFailed)
            }
            Err(step) => step,
        }
    }

    async fn on_services_discovered(
        &mut self,
        status: GattStatus,
        services: &[ServiceInfo],
        cancel: &CancellationToken,
    ) -> Step {
        if self.state != SessionState::DiscoveringServices {
            trace!(state = %self.state, "ignoring unsolicited discovery result");
            return Step::Continue;
        }
        if !status.is_success() {
            debug!(%status, "service discovery failed");
            return Step::fail(FailureReason::ServiceDiscoveryFailed);
        }

        self.transition(SessionState::AwaitingCharacteristic);
        let target = self.session.target;
        let Some(characteristic) = find_characteristic(services, &target) else {
            debug!(
                service = %target.service,
                characteristic = %target.characteristic,
                discovered = services.len(),
                "target characteristic is not offered by the peer"
            );
            return Step::fail(FailureReason::CharacteristicNotFound);
        };

        self.transition(SessionState::NotificationsEnabling);
        let cccd = endpoint_metadata(EndpointId::ClientCharacteristicConfiguration);
        if characteristic.has_descriptor(cccd.uuid()) {
            if let Err(step) = self.enable_notifications(cancel).await {
                return step;
            }
        } else {
            warn!(
                descriptor = cccd.name(),
                kind = %cccd.kind(),
                "peer has no notification configuration descriptor; continuing without it"
            );
        }

        self.transition(SessionState::WritePending);
        self.timers.arm_settle(self.session.config.settle_delay());
        Step::Continue
    }

    async fn enable_notifications(&self, cancel: &CancellationToken) -> Result<(), Step> {
        let Some(connection) = self.connection() else {
            return Err(Step::fail(FailureReason::SessionAborted));
        };
        let request = connection.write_descriptor(
            &self.session.target,
            EndpointId::ClientCharacteristicConfiguration.uuid(),
            &ENABLE_NOTIFICATION_VALUE,
        );
        let result = completed(guarded(cancel, self.timers.overall_deadline(), request).await);
        if let Err(error) = result? {
            warn!(%error, "enabling notifications failed; continuing without it");
        }
        Ok(())
    }

    async fn write_command(&mut self, cancel: &CancellationToken) -> Step {
        let Some(connection) = self.connection() else {
            return Step::fail(FailureReason::SessionAborted);
        };
        let request = connection.write_characteristic(&self.session.target, &self.session.command);
        let result = completed(guarded(cancel, self.timers.overall_deadline(), request).await);
        match result {
            Ok(Ok(())) => {
                self.write_issued = true;
                self.timers.reset_inactivity();
                trace!(
                    command_len = self.session.command.len(),
                    "device-info command written"
                );
                Step::Continue
            }
            Ok(Err(error)) => {
                debug!(%error, "command write request failed");
                Step::fail(FailureReason::WriteFailed)
            }
            Err(step) => step,
        }
    }

    fn on_written(&mut self, characteristic: uuid::Uuid, status: GattStatus) -> Step {
        if characteristic != self.session.target.characteristic
            || self.state != SessionState::WritePending
            || !self.write_issued
        {
            trace!(%characteristic, state = %self.state, "ignoring write completion");
            return Step::Continue;
        }
        if !status.is_success() {
            debug!(%status, "peer rejected the command write");
            return Step::fail(FailureReason::WriteFailed);
        }

        self.transition(SessionState::AwaitingChunks);
        Step::Continue
    }

    fn on_chunk(&mut self, characteristic: uuid::Uuid, value: &[u8]) -> Step {
        if characteristic != self.session.target.characteristic || !self.write_issued {
            trace!(%characteristic, state = %self.state, "ignoring notification");
            return Step::Continue;
        }

        self.timers.reset_inactivity();
        match self.reassembler.append(value) {
            Some(Ok(payload)) => {
                Step::Finish(SessionEnd::Outcome(ProtocolOutcome::Success(payload)))
            }
            Some(Err(error)) => {
                debug!(%error, "reply document did not decode");
                Step::fail(FailureReason::InvalidPayload)
            }
            None => Step::Continue,
        }
    }

    fn connection(&self) -> Option<&dyn GattConnection> {
        self.guard.as_ref().and_then(ConnectionGuard::connection)
    }
}
