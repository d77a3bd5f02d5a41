use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::transport::{EventSink, GattConnection};

/// Timer that woke the session loop.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum TimerFired {
    Overall,
    Inactivity,
    Settle,
}

/// Deadlines that bound one exchange.
///
/// The overall deadline is fixed at session start. The inactivity and settle
/// deadlines are armed and re-armed by the session as it progresses.
#[derive(Debug)]
pub(crate) struct ExchangeTimers {
    overall: Instant,
    inactivity_window: Duration,
    inactivity: Option<Instant>,
    settle: Option<Instant>,
}

impl ExchangeTimers {
    pub(crate) fn start(overall_timeout: Duration, inactivity_window: Duration) -> Self {
        Self {
            overall: Instant::now() + overall_timeout,
            inactivity_window,
            inactivity: None,
            settle: None,
        }
    }

    pub(crate) fn overall_deadline(&self) -> Instant {
        self.overall
    }

    /// Arms the inactivity timer, or pushes it back by a full window.
    pub(crate) fn reset_inactivity(&mut self) {
        self.inactivity = Some(Instant::now() + self.inactivity_window);
    }

    pub(crate) fn arm_settle(&mut self, delay: Duration) {
        self.settle = Some(Instant::now() + delay);
    }

    pub(crate) fn disarm_settle(&mut self) {
        self.settle = None;
    }

    pub(crate) fn is_inactivity_armed(&self) -> bool {
        self.inactivity.is_some()
    }

    /// Resolves when the earliest armed deadline passes.
    ///
    /// Deadlines that have all passed resolve in priority order: overall,
    /// then inactivity, then settle.
    pub(crate) fn expiry(&self) -> impl Future<Output = TimerFired> + Send + 'static {
        let overall = self.overall;
        let inactivity = self.inactivity;
        let settle = self.settle;
        async move {
            tokio::select! {
                biased;
                () = sleep_until(overall) => TimerFired::Overall,
                () = sleep_until_armed(inactivity) => TimerFired::Inactivity,
                () = sleep_until_armed(settle) => TimerFired::Settle,
            }
        }
    }
}

async fn sleep_until_armed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Result of a transport request raced against cancellation and the overall deadline.
#[derive(Debug)]
pub(crate) enum Guarded<T> {
    Done(T),
    Cancelled,
    TimedOut,
}

pub(crate) async fn guarded<F: Future>(
    cancel: &CancellationToken,
    deadline: Instant,
    request: F,
) -> Guarded<F::Output> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Guarded::Cancelled,
        () = sleep_until(deadline) => Guarded::TimedOut,
        output = request => Guarded::Done(output),
    }
}

/// One-shot delivery point that accepts exactly one value.
#[derive(Debug)]
pub(crate) struct OutcomeSlot<T> {
    delivered: AtomicBool,
    sender: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> OutcomeSlot<T> {
    pub(crate) fn new() -> (Self, oneshot::Receiver<T>) {
        let (sender, receiver) = oneshot::channel();
        let slot = Self {
            delivered: AtomicBool::new(false),
            sender: Mutex::new(Some(sender)),
        };
        (slot, receiver)
    }

    /// Delivers `value` unless a value was already delivered.
    ///
    /// Returns `true` only when the awaiting side received the value.
    pub(crate) fn deliver(&self, value: T) -> bool {
        if self.delivered.swap(true, Ordering::AcqRel) {
            debug!("ignoring outcome after one was already delivered");
            return false;
        }

        let sender = match self.sender.lock() {
            Ok(mut sender) => sender.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        sender.is_some_and(|sender| sender.send(value).is_ok())
    }
}

/// Exclusive owner of one open connection that tears it down exactly once.
#[derive(Debug)]
pub(crate) struct ConnectionGuard {
    connection: Option<Box<dyn GattConnection>>,
    events: EventSink,
}

impl ConnectionGuard {
    pub(crate) fn new(connection: Box<dyn GattConnection>, events: EventSink) -> Self {
        Self {
            connection: Some(connection),
            events,
        }
    }

    pub(crate) fn connection(&self) -> Option<&dyn GattConnection> {
        self.connection.as_deref()
    }

    /// Stops callback delivery, disconnects and closes the connection.
    ///
    /// Returns `false` when the connection was already released.
    pub(crate) async fn release(&mut self) -> bool {
        let Some(connection) = self.connection.take() else {
            return false;
        };

        self.events.close();
        teardown(connection).await;
        true
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        self.events.close();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(teardown(connection));
            }
            Err(_) => debug!("no runtime available to tear down dropped connection"),
        }
    }
}

async fn teardown(connection: Box<dyn GattConnection>) {
    if let Err(error) = connection.disconnect().await {
        debug!(?error, "disconnect failed during teardown");
    }
    connection.close().await;
}
