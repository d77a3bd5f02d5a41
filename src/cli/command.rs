use std::path::PathBuf;
use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;
use uuid::Uuid;

use crate::cli::classify::ClassifyArgs;
use crate::cli::identity::IdentityArgs;
use crate::cli::probe::ProbeArgs;
use crate::config::{ExchangeConfig, StaticCommand};
use crate::error::{CliConfigError, FixtureError};
use crate::protocol::DEFAULT_DEVICE_INFO_COMMAND;
use crate::transport::{ChunkFixture, DiscoveryBehaviour, FakeTransportConfig, ReplyScript};

/// Default size of one fake notification chunk: the BLE ATT payload at the default MTU.
pub const DEFAULT_FAKE_CHUNK_SIZE: usize = 20;
const DEFAULT_FAKE_CHUNK_INTERVAL: Duration = Duration::from_millis(50);

/// Command-line options for the device-info exchange tool.
#[derive(Debug, Parser)]
#[command(
    name = "devinfo",
    about = "Request and classify device info from BLE peripherals."
)]
pub struct Args {
    /// Log verbosity; overrides `RUST_LOG`.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output format; defaults to `pretty` on a terminal and `json` otherwise.
    #[arg(long, global = true, value_enum)]
    output: Option<OutputFormat>,
    /// Absolute deadline for the whole exchange (e.g. `25s`).
    #[arg(long, global = true, value_parser = parse_duration)]
    overall_timeout: Option<Duration>,
    /// Silence after the last reply chunk before finalising (e.g. `3s`).
    #[arg(long, global = true, value_parser = parse_duration)]
    inactivity_timeout: Option<Duration>,
    /// Pause between enabling notifications and writing the command (e.g. `500ms`).
    #[arg(long, global = true, value_parser = parse_duration)]
    settle_delay: Option<Duration>,
    /// Device-info service UUID.
    #[arg(long, global = true)]
    service_uuid: Option<Uuid>,
    /// Device-info characteristic UUID.
    #[arg(long, global = true)]
    characteristic_uuid: Option<Uuid>,
    /// Command payload written to the device-info characteristic.
    #[arg(long = "command", global = true)]
    command_payload: Option<String>,
    /// Path of the persisted caller identity file.
    #[arg(long, global = true)]
    identity_file: Option<PathBuf>,
    /// Uses the scripted fake transport instead of BLE hardware.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake reply document, split into `--fake-chunk-size` byte chunks.
    #[arg(long, global = true, requires = "fake")]
    fake_reply: Option<String>,
    /// Fake reply as comma-separated hexadecimal chunks.
    #[arg(long, global = true, requires = "fake")]
    fake_chunks: Option<ChunkFixture>,
    /// Bytes per fake reply chunk [default: 20].
    #[arg(long, global = true, requires = "fake")]
    fake_chunk_size: Option<usize>,
    /// Delay before each fake reply chunk (e.g. `50ms`).
    #[arg(long, global = true, requires = "fake", value_parser = parse_duration)]
    fake_chunk_interval: Option<Duration>,
    /// How the fake peer answers service discovery.
    #[arg(long, global = true, requires = "fake", value_enum)]
    fake_discovery: Option<DiscoveryBehaviour>,
    /// Status code reported by the fake connect callback.
    #[arg(long, global = true, requires = "fake")]
    fake_connect_status: Option<u8>,
    /// Status code reported by the fake write callback.
    #[arg(long, global = true, requires = "fake")]
    fake_write_status: Option<u8>,
    /// Omits the notification configuration descriptor from the fake peer.
    #[arg(long, global = true, requires = "fake")]
    fake_no_cccd: bool,
    /// Drops the fake link after this many reply chunks.
    #[arg(long, global = true, requires = "fake")]
    fake_disconnect_after: Option<usize>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use devinfo::{Args, Command, ProbeArgs};
    ///
    /// let args = Args::new(Command::Probe(ProbeArgs::new("AA:BB:CC:DD:EE:FF")));
    /// assert_eq!(Duration::from_secs(25), args.session_settings().exchange().overall_timeout());
    ///
    /// let (command, fake) = args.into_command_and_fake_args()?;
    /// assert!(matches!(command, Command::Probe(_)));
    /// assert!(fake.is_none());
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            log_level: None,
            output: None,
            overall_timeout: None,
            inactivity_timeout: None,
            settle_delay: None,
            service_uuid: None,
            characteristic_uuid: None,
            command_payload: None,
            identity_file: None,
            fake: false,
            fake_reply: None,
            fake_chunks: None,
            fake_chunk_size: None,
            fake_chunk_interval: None,
            fake_discovery: None,
            fake_connect_status: None,
            fake_write_status: None,
            fake_no_cccd: false,
            fake_disconnect_after: None,
            command,
        }
    }

    /// Returns the requested log-level override.
    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    /// Returns the requested output format, if one was given.
    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output
    }

    /// Collects exchange timing, addressing, command, and identity options.
    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        let defaults = ExchangeConfig::default();
        let target = defaults.target();
        let exchange = ExchangeConfig::builder()
            .overall_timeout(self.overall_timeout.unwrap_or(defaults.overall_timeout()))
            .inactivity_timeout(
                self.inactivity_timeout
                    .unwrap_or(defaults.inactivity_timeout()),
            )
            .settle_delay(self.settle_delay.unwrap_or(defaults.settle_delay()))
            .service(self.service_uuid.unwrap_or(target.service))
            .characteristic(self.characteristic_uuid.unwrap_or(target.characteristic))
            .build();

        SessionSettings::builder()
            .exchange(exchange)
            .command(
                self.command_payload
                    .as_deref()
                    .unwrap_or(DEFAULT_DEVICE_INFO_COMMAND),
            )
            .maybe_identity_file(self.identity_file.clone())
            .maybe_output_format(self.output)
            .build()
    }

    /// Splits parsed CLI arguments into command and optional fake-transport settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the fake transport options are invalid.
    pub fn into_command_and_fake_args(self) -> anyhow::Result<(Command, Option<FakeArgs>)> {
        if !self.fake {
            return Ok((self.command, None));
        }

        let reply = match (self.fake_reply, self.fake_chunks) {
            (Some(_), Some(_)) => return Err(CliConfigError::ConflictingFakeReply.into()),
            (Some(text), None) => Some(ReplyScript::from_text(
                &text,
                self.fake_chunk_size.unwrap_or(DEFAULT_FAKE_CHUNK_SIZE),
            )?),
            (None, Some(chunks)) => Some(ReplyScript::from(chunks)),
            (None, None) => None,
        };

        let fake_args = FakeArgs::builder()
            .maybe_reply(reply)
            .maybe_chunk_interval(self.fake_chunk_interval)
            .maybe_discovery(self.fake_discovery)
            .maybe_connect_status(self.fake_connect_status)
            .maybe_write_status(self.fake_write_status)
            .include_cccd(!self.fake_no_cccd)
            .maybe_disconnect_after(self.fake_disconnect_after)
            .build();
        Ok((self.command, Some(fake_args)))
    }
}

/// Options shared by every exchange a command runs.
#[derive(Debug, Clone, Default, Builder)]
pub struct SessionSettings {
    #[builder(default)]
    exchange: ExchangeConfig,
    #[builder(default, into)]
    command: StaticCommand,
    identity_file: Option<PathBuf>,
    output_format: Option<OutputFormat>,
}

impl SessionSettings {
    #[must_use]
    pub fn exchange(&self) -> ExchangeConfig {
        self.exchange
    }

    #[must_use]
    pub fn command(&self) -> &StaticCommand {
        &self.command
    }

    #[must_use]
    pub fn identity_file(&self) -> Option<&PathBuf> {
        self.identity_file.as_ref()
    }

    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output_format
    }
}

/// Fake transport arguments for programmatic runs.
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> anyhow::Result<()> {
/// use std::time::Duration;
///
/// use devinfo::{DeviceInfoClient, ExchangeConfig, FakeArgs, ProtocolOutcome};
/// use tokio_util::sync::CancellationToken;
///
/// let fake = FakeArgs::builder()
///     .chunks("7b7d")?
///     .chunk_interval(Duration::ZERO)
///     .build();
/// let client = DeviceInfoClient::new(devinfo::fake_transport(fake))
///     .with_config(ExchangeConfig::builder().settle_delay(Duration::ZERO).build());
/// let target = client.config().target();
///
/// let outcome = client
///     .load_device_info(
///         "AA:BB:CC:DD:EE:FF",
///         target.service,
///         target.characteristic,
///         &CancellationToken::new(),
///     )
///     .await?;
/// assert!(matches!(outcome, ProtocolOutcome::Success(_)));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Builder)]
pub struct FakeArgs {
    reply: Option<ReplyScript>,
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    chunks: Option<ChunkFixture>,
    #[builder(default = DEFAULT_FAKE_CHUNK_INTERVAL)]
    chunk_interval: Duration,
    #[builder(default)]
    discovery: DiscoveryBehaviour,
    #[builder(default)]
    connect_status: u8,
    #[builder(default)]
    write_status: u8,
    #[builder(default = true)]
    include_cccd: bool,
    disconnect_after: Option<usize>,
}

impl FakeArgs {
    pub(crate) fn into_transport_config(self) -> FakeTransportConfig {
        let Self {
            reply,
            chunks,
            chunk_interval,
            discovery,
            connect_status,
            write_status,
            include_cccd,
            disconnect_after,
        } = self;

        let reply = chunks.map(ReplyScript::from).or(reply).unwrap_or_default();
        FakeTransportConfig::builder()
            .reply(reply)
            .chunk_interval(chunk_interval)
            .discovery(discovery)
            .connect_status(connect_status)
            .write_status(write_status)
            .include_cccd(include_cccd)
            .maybe_disconnect_after_chunks(disconnect_after)
            .build()
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect to a peer, request its device info, and print the exchange outcome.
    Probe(ProbeArgs),
    /// Request device info and classify the device's adoption state for the caller.
    Classify(ClassifyArgs),
    /// Show or change the persisted caller identity.
    Identity(IdentityArgs),
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Probe(_) => "probe",
            Self::Classify(_) => "classify",
            Self::Identity(_) => "identity",
        }
    }
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    #[must_use]
    pub fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// Output format accepted by `--output`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Json,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}
