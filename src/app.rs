use std::io;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::classify::{AdoptionClassification, Classifier};
use crate::cli::{Command, FakeArgs, LogLevel, OutputFormat, SessionSettings};
use crate::config::{CommandProvider, ExchangeConfig, IdentityProvider, StaticCommand, StaticIdentity};
use crate::error::ExchangeCancelled;
use crate::exchange::{OutcomeSlot, ProtocolSession, SessionEnd};
use crate::payload::{FailureReason, ProtocolOutcome};
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};
use crate::transport::{BtleplugTransport, CharacteristicRef, FakeTransport, GattTransport};

/// Creates a transport backed by the host's BLE adapters.
#[must_use]
pub fn real_transport() -> Arc<dyn GattTransport> {
    Arc::new(BtleplugTransport::new())
}

/// Creates a transport backed by scripted fake fixtures.
#[must_use]
pub fn fake_transport(fake_args: FakeArgs) -> Arc<dyn GattTransport> {
    Arc::new(FakeTransport::new(fake_args.into_transport_config()))
}

/// Entry point for device-info exchanges and adoption classification.
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> anyhow::Result<()> {
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use devinfo::{
///     AdoptionClassification, DeviceInfoClient, ExchangeConfig, FakeTransport,
///     FakeTransportConfig, ReplyScript, StaticIdentity,
/// };
/// use tokio_util::sync::CancellationToken;
///
/// let reply = ReplyScript::from_text(r#"{"device_id":"D7","user_id":"U2","adoption_status":1}"#, 16)?;
/// let transport = FakeTransport::new(
///     FakeTransportConfig::builder()
///         .reply(reply)
///         .chunk_interval(Duration::ZERO)
///         .build(),
/// );
/// let client = DeviceInfoClient::new(Arc::new(transport))
///     .with_identity(StaticIdentity::new(Some("U2".to_string())))
///     .with_config(ExchangeConfig::builder().settle_delay(Duration::ZERO).build());
///
/// let classification = client
///     .classify_device("AA:BB:CC:DD:EE:FF", &CancellationToken::new())
///     .await?;
/// assert!(matches!(classification, AdoptionClassification::Owner(_)));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct DeviceInfoClient {
    transport: Arc<dyn GattTransport>,
    identity: Box<dyn IdentityProvider>,
    command: Box<dyn CommandProvider>,
    config: ExchangeConfig,
}

impl DeviceInfoClient {
    /// Creates a client for an anonymous caller sending the default command.
    #[must_use]
    pub fn new(transport: Arc<dyn GattTransport>) -> Self {
        Self {
            transport,
            identity: Box::new(StaticIdentity::anonymous()),
            command: Box::new(StaticCommand::default()),
            config: ExchangeConfig::default(),
        }
    }

    #[must_use]
    pub fn with_identity(mut self, identity: impl IdentityProvider + 'static) -> Self {
        self.identity = Box::new(identity);
        self
    }

    #[must_use]
    pub fn with_command(mut self, command: impl CommandProvider + 'static) -> Self {
        self.command = Box::new(command);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: ExchangeConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    /// Runs one device-info exchange with `peer`.
    ///
    /// Cancelling `cancel` stops the exchange at its next suspension point,
    /// waits for the connection to be released, and returns
    /// [`ExchangeCancelled`]. Dropping the returned future also cancels the
    /// exchange; teardown then finishes in the background.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeCancelled`] when `cancel` fires before an outcome is
    /// delivered. Transport faults are reported as
    /// [`ProtocolOutcome::Failure`], never as errors.
    #[instrument(skip(self, cancel), level = "debug")]
    pub async fn load_device_info(
        &self,
        peer: &str,
        service: Uuid,
        characteristic: Uuid,
        cancel: &CancellationToken,
    ) -> Result<ProtocolOutcome, ExchangeCancelled> {
        let session = ProtocolSession::builder()
            .transport(Arc::clone(&self.transport))
            .peer(peer)
            .target(CharacteristicRef::new(service, characteristic))
            .command(self.command.device_info_command().into_bytes())
            .config(self.config)
            .build();

        let session_token = cancel.child_token();
        let _cancel_on_drop = session_token.clone().drop_guard();
        let (slot, receiver) = OutcomeSlot::new();
        let mut task = tokio::spawn(async move {
            let (end, _report) = session.run(session_token).await;
            if let SessionEnd::Outcome(outcome) = end
                && !slot.deliver(outcome)
            {
                debug!("caller stopped waiting before the outcome was delivered");
            }
        });

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                if let Err(error) = (&mut task).await {
                    debug!(%error, "session task ended abnormally during cancellation");
                }
                Err(ExchangeCancelled)
            }
            received = receiver => match received {
                Ok(outcome) => Ok(outcome),
                Err(_closed) if cancel.is_cancelled() => Err(ExchangeCancelled),
                Err(_closed) => Ok(ProtocolOutcome::Failure(FailureReason::SessionAborted)),
            },
        }
    }

    /// Runs an exchange with the configured target and classifies the reply
    /// for the current caller.
    ///
    /// Partial replies and failed exchanges classify as
    /// [`AdoptionClassification::Error`].
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeCancelled`] when `cancel` fires first.
    #[instrument(skip(self, cancel), level = "debug")]
    pub async fn classify_device(
        &self,
        peer: &str,
        cancel: &CancellationToken,
    ) -> Result<AdoptionClassification, ExchangeCancelled> {
        let target = self.config.target();
        let outcome = self
            .load_device_info(peer, target.service, target.characteristic, cancel)
            .await?;
        let caller = self.identity.current_user_id();

        let classification = match outcome {
            ProtocolOutcome::Success(payload) => Classifier::classify(payload, caller.as_deref()),
            ProtocolOutcome::Partial(partial) => AdoptionClassification::Error(format!(
                "incomplete device info ({} bytes received)",
                partial.received_chars()
            )),
            ProtocolOutcome::Failure(reason) => AdoptionClassification::Error(reason.to_string()),
        };
        debug!(classification = classification.label(), "device classified");
        Ok(classification)
    }
}

/// Runs the CLI command against `transport`.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = devinfo::Args::try_parse_from([
///     "devinfo",
///     "--fake",
///     "--fake-reply",
///     r#"{"device_name":"Greenhouse","adoption_status":0}"#,
///     "probe",
///     "--address",
///     "AA:BB:CC:DD:EE:FF",
/// ])?;
/// let settings = args.session_settings();
/// let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
/// let transport = match maybe_fake_args {
///     Some(fake_args) => devinfo::fake_transport(fake_args),
///     None => devinfo::real_transport(),
/// };
/// let mut out = Vec::new();
/// devinfo::run(command, &mut out, transport, settings).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the exchange fails or
/// is cancelled, or output writing fails.
pub async fn run<W>(
    command: Command,
    out: &mut W,
    transport: Arc<dyn GattTransport>,
    settings: SessionSettings,
) -> Result<()>
where
    W: io::Write,
{
    run_with_log_level(command, out, transport, settings, None).await
}

/// Runs the CLI command with an explicit telemetry log-level override.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the exchange fails or
/// is cancelled, or output writing fails.
pub async fn run_with_log_level<W>(
    command: Command,
    out: &mut W,
    transport: Arc<dyn GattTransport>,
    settings: SessionSettings,
    log_level: Option<LogLevel>,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients(
        command,
        out,
        &SystemTerminalClient,
        transport,
        settings,
        log_level,
    )
    .await
}

/// Runs the CLI command with injected clients and explicit telemetry settings.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// struct FakeTerminal;
/// impl devinfo::TerminalClient for FakeTerminal {
///     fn stdout_is_terminal(&self) -> bool { false }
///     fn stderr_is_terminal(&self) -> bool { false }
/// }
///
/// let args = devinfo::Args::try_parse_from([
///     "devinfo",
///     "--log-level",
///     "trace",
///     "--fake",
///     "--fake-chunks",
///     "7b7d",
///     "probe",
///     "--address",
///     "AA:BB:CC:DD:EE:FF",
/// ])?;
/// let log_level = args.log_level();
/// let settings = args.session_settings();
/// let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
/// let transport = match maybe_fake_args {
///     Some(fake_args) => devinfo::fake_transport(fake_args),
///     None => devinfo::real_transport(),
/// };
/// let mut out = Vec::new();
/// devinfo::run_with_clients(
///     command,
///     &mut out,
///     &FakeTerminal,
///     transport,
///     settings,
///     log_level,
/// ).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the exchange fails or
/// is cancelled, or output writing fails.
#[instrument(
    skip(out, terminal_client, transport, settings),
    level = "info",
    fields(command = %command.name(), ?log_level)
)]
pub async fn run_with_clients<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    transport: Arc<dyn GattTransport>,
    settings: SessionSettings,
    log_level: Option<LogLevel>,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(
        "devinfo",
        terminal_client.stderr_is_terminal(),
        log_level.map(LogLevel::as_level_filter),
    )?;

    let output_format = settings.output_format().unwrap_or(
        if terminal_client.stdout_is_terminal() {
            OutputFormat::Pretty
        } else {
            OutputFormat::Json
        },
    );
    let client = DeviceInfoClient::new(transport)
        .with_config(settings.exchange())
        .with_command(settings.command().clone());

    match command {
        Command::Probe(args) => {
            crate::cli::probe::run(&client, &args, out, terminal_client, output_format).await
        }
        Command::Classify(args) => {
            crate::cli::classify::run(client, &args, &settings, out, terminal_client, output_format)
                .await
        }
        Command::Identity(args) => {
            crate::cli::identity::run(&args, &settings, out, terminal_client, output_format)
        }
    }
}
