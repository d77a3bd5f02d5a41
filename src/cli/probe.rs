use std::io;

use anyhow::Result;
use clap::Args;
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;
use tracing::{Span, instrument};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::DeviceInfoClient;
use crate::cli::{OutputFormat, until_ctrl_c, write_json};
use crate::error::CommandError;
use crate::payload::ProtocolOutcome;
use crate::terminal::TerminalClient;

use super::ui::{CancelledView, OutcomeView, Painter};

/// Arguments for the `probe` command.
#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Address or platform identifier of the peer.
    #[arg(long)]
    address: String,
}

impl ProbeArgs {
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    pub(crate) fn address(&self) -> &str {
        &self.address
    }
}

/// Executes the `probe` command.
#[instrument(
    skip(client, args, out, terminal_client),
    level = "info",
    fields(peer = %args.address(), ?output_format)
)]
pub(crate) async fn run<W>(
    client: &DeviceInfoClient,
    args: &ProbeArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let span = Span::current();
    span.pb_set_message(&format!("Requesting device info from {}", args.address()));

    let cancel = CancellationToken::new();
    let target = client.config().target();
    let exchange = client.load_device_info(
        args.address(),
        target.service,
        target.characteristic,
        &cancel,
    );
    let painter = Painter::new(terminal_client.stdout_is_terminal());

    let outcome = match until_ctrl_c(&cancel, exchange).await {
        Ok(outcome) => outcome,
        Err(cancelled) => {
            span.pb_set_finish_message(&format!("{} Cancelled", "!".yellow()));
            match output_format {
                OutputFormat::Pretty => writeln!(out, "{}", CancelledView::new(&painter))?,
                OutputFormat::Json => write_json(out, &CancelledView::json())?,
            }
            return Err(CommandError::from(cancelled).into());
        }
    };

    let finish = match &outcome {
        ProtocolOutcome::Failure(_) => format!("{} Exchange failed", "✗".red()),
        ProtocolOutcome::Partial(_) => format!("{} Partial reply", "!".yellow()),
        ProtocolOutcome::Success(_) => format!("{} Device info received", "✓".green()),
    };
    span.pb_set_finish_message(&finish);

    match output_format {
        OutputFormat::Pretty => writeln!(out, "{}", OutcomeView::new(&outcome, &painter))?,
        OutputFormat::Json => write_json(out, &outcome)?,
    }

    match outcome {
        ProtocolOutcome::Failure(reason) => Err(CommandError::ExchangeFailed { reason }.into()),
        ProtocolOutcome::Success(_) | ProtocolOutcome::Partial(_) => Ok(()),
    }
}
