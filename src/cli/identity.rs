use std::io;

use anyhow::Result;
use clap::{Args, Subcommand};
use serde_json::json;
use tracing::info;

use crate::cli::{OutputFormat, SessionSettings, write_json};
use crate::config::IdentityStore;
use crate::terminal::TerminalClient;

use super::ui::{IdentityView, Painter};

/// Arguments for the `identity` command.
#[derive(Debug, Args)]
pub struct IdentityArgs {
    #[command(subcommand)]
    action: IdentityAction,
}

impl IdentityArgs {
    #[must_use]
    pub fn new(action: IdentityAction) -> Self {
        Self { action }
    }
}

/// Operations on the persisted caller identity.
#[derive(Debug, Clone, Subcommand)]
pub enum IdentityAction {
    /// Print the stored user id.
    Show,
    /// Store a user id for later `classify` runs.
    Set {
        /// User identifier of the caller.
        user_id: String,
    },
    /// Remove the stored user id.
    Clear,
}

/// Executes the `identity` command.
pub(crate) fn run<W>(
    args: &IdentityArgs,
    settings: &SessionSettings,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let store = IdentityStore::open(settings.identity_file().cloned())?;
    let user_id = match &args.action {
        IdentityAction::Show => store.load()?,
        IdentityAction::Set { user_id } => {
            let stored = store.save(user_id)?;
            info!(path = %store.path().display(), "caller identity stored");
            Some(stored)
        }
        IdentityAction::Clear => {
            if store.clear()? {
                info!(path = %store.path().display(), "caller identity cleared");
            }
            None
        }
    };

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(
                out,
                "{}",
                IdentityView::new(user_id.as_deref(), store.path(), &painter)
            )?;
        }
        OutputFormat::Json => write_json(
            out,
            &json!({
                "user_id": user_id,
                "path": store.path(),
            }),
        )?,
    }
    Ok(())
}
