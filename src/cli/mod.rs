pub(crate) mod classify;
pub(crate) mod command;
pub(crate) mod identity;
pub(crate) mod probe;
pub(crate) mod ui;

use std::io;

use anyhow::Result;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use self::classify::ClassifyArgs;
pub use self::command::{
    Args, Command, DEFAULT_FAKE_CHUNK_SIZE, FakeArgs, LogLevel, OutputFormat, SessionSettings,
};
pub use self::identity::{IdentityAction, IdentityArgs};
pub use self::probe::ProbeArgs;

/// Awaits `exchange`, cancelling `cancel` if Ctrl+C arrives first.
///
/// The exchange is always awaited to completion so its teardown finishes
/// before the command returns.
pub(crate) async fn until_ctrl_c<F>(cancel: &CancellationToken, exchange: F) -> F::Output
where
    F: Future,
{
    tokio::pin!(exchange);
    tokio::select! {
        output = &mut exchange => output,
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => {
                    debug!("Ctrl+C received; cancelling exchange");
                    cancel.cancel();
                }
                Err(error) => warn!(%error, "failed while waiting for Ctrl+C"),
            }
            exchange.await
        }
    }
}

pub(crate) fn write_json<W, T>(out: &mut W, value: &T) -> Result<()>
where
    W: io::Write,
    T: Serialize + ?Sized,
{
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
