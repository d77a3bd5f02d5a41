use std::io;

use anyhow::Result;
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{Span, instrument, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::DeviceInfoClient;
use crate::classify::AdoptionClassification;
use crate::cli::{OutputFormat, SessionSettings, until_ctrl_c, write_json};
use crate::config::{IdentityStore, StaticIdentity};
use crate::error::CommandError;
use crate::terminal::TerminalClient;

use super::ui::{CancelledView, ClassificationView, Painter};

/// Arguments for the `classify` command.
#[derive(Debug, Args)]
pub struct ClassifyArgs {
    /// Address or platform identifier of the peer.
    #[arg(long)]
    address: String,
    /// Caller user id; defaults to the persisted identity.
    #[arg(long)]
    user_id: Option<String>,
}

impl ClassifyArgs {
    #[must_use]
    pub fn new(address: impl Into<String>, user_id: Option<String>) -> Self {
        Self {
            address: address.into(),
            user_id,
        }
    }
}

/// Executes the `classify` command.
#[instrument(
    skip(client, args, settings, out, terminal_client),
    level = "info",
    fields(peer = %args.address, ?output_format)
)]
pub(crate) async fn run<W>(
    client: DeviceInfoClient,
    args: &ClassifyArgs,
    settings: &SessionSettings,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let client = match &args.user_id {
        Some(user_id) => client.with_identity(StaticIdentity::new(Some(user_id.clone()))),
        None => match IdentityStore::open(settings.identity_file().cloned()) {
            Ok(store) => client.with_identity(store),
            Err(error) => {
                warn!(%error, "no identity store available; classifying as anonymous caller");
                client
            }
        },
    };

    Span::current().pb_set_message(&format!("Classifying {}", args.address));
    let cancel = CancellationToken::new();
    let exchange = client.classify_device(&args.address, &cancel);
    let painter = Painter::new(terminal_client.stdout_is_terminal());

    let classification = match until_ctrl_c(&cancel, exchange).await {
        Ok(classification) => classification,
        Err(cancelled) => {
            match output_format {
                OutputFormat::Pretty => writeln!(out, "{}", CancelledView::new(&painter))?,
                OutputFormat::Json => write_json(out, &CancelledView::json())?,
            }
            return Err(CommandError::from(cancelled).into());
        }
    };

    match output_format {
        OutputFormat::Pretty => writeln!(
            out,
            "{}",
            ClassificationView::new(&classification, &painter)
        )?,
        OutputFormat::Json => write_json(out, &classification)?,
    }

    match classification {
        AdoptionClassification::Error(message) => {
            Err(CommandError::ClassificationFailed { message }.into())
        }
        AdoptionClassification::Unauthorized
        | AdoptionClassification::AdoptAvailable(_)
        | AdoptionClassification::Owner(_) => Ok(()),
    }
}
