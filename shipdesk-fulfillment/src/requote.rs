use futures_util::future::BoxFuture;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;
use shipdesk_core::PackageDescriptor;

use crate::error::FulfillmentResult;
use crate::rates::{RateAggregator, RateBoard};

/// Monotonic tags for quote requests. Only the most recently issued tag may
/// update what is displayed.
#[derive(Debug, Default)]
pub struct QuoteSequencer {
    latest: AtomicU64,
}

impl QuoteSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self) -> u64 {
        self.latest.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn latest(&self) -> u64 {
        self.latest.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, seq: u64) -> bool {
        self.latest() == seq
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", content = "board", rename_all = "snake_case")]
pub enum RateState {
    /// Nothing to quote, or quoting was canceled
    Idle,
    /// Waiting out the debounce window or for carriers to answer
    Pending,
    Ready(RateBoard),
    Failed(String),
}

/// What the rate panel shows, tagged with the request that produced it
#[derive(Debug, Clone, Serialize)]
pub struct RateView {
    pub seq: u64,
    pub state: RateState,
}

enum Command {
    Package { package: PackageDescriptor, has_selection: bool },
    Cancel,
}

type InFlight = (u64, BoxFuture<'static, FulfillmentResult<RateBoard>>);

/// Re-quotes an order whenever its package changes.
///
/// Edits are coalesced over a quiet period. A newer edit supersedes the
/// quote in flight by dropping it, and results are published only when
/// their sequence number is still the latest. Dropping the session cancels
/// any outstanding quote.
pub struct RequoteSession {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<RateView>,
    sequencer: Arc<QuoteSequencer>,
    task: JoinHandle<()>,
}

impl RequoteSession {
    pub fn spawn(aggregator: Arc<RateAggregator>, order_id: Uuid, debounce: Duration) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (view_tx, view) = watch::channel(RateView { seq: 0, state: RateState::Idle });
        let sequencer = Arc::new(QuoteSequencer::new());

        let task = tokio::spawn(run(aggregator, order_id, debounce, rx, view_tx, sequencer.clone()));
        Self { commands, view, sequencer, task }
    }

    pub fn package_changed(&self, package: PackageDescriptor, has_selection: bool) {
        let _ = self.commands.send(Command::Package { package, has_selection });
    }

    pub fn cancel(&self) {
        let _ = self.commands.send(Command::Cancel);
    }

    pub fn subscribe(&self) -> watch::Receiver<RateView> {
        self.view.clone()
    }

    pub fn current(&self) -> RateView {
        self.view.borrow().clone()
    }

    pub fn latest_seq(&self) -> u64 {
        self.sequencer.latest()
    }
}

impl Drop for RequoteSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn next_result(in_flight: &mut Option<InFlight>) -> (u64, FulfillmentResult<RateBoard>) {
    match in_flight {
        Some((seq, fut)) => (*seq, fut.await),
        None => std::future::pending().await,
    }
}

async fn run(
    aggregator: Arc<RateAggregator>,
    order_id: Uuid,
    debounce: Duration,
    mut rx: mpsc::UnboundedReceiver<Command>,
    view: watch::Sender<RateView>,
    sequencer: Arc<QuoteSequencer>,
) {
    let mut pending: Option<(u64, PackageDescriptor)> = None;
    let mut deadline: Option<Instant> = None;
    let mut in_flight: Option<InFlight> = None;

    loop {
        tokio::select! {
            cmd = rx.recv() => {
                // Any command supersedes whatever is in flight
                in_flight = None;
                match cmd {
                    Some(Command::Package { package, has_selection: true }) => {
                        let seq = sequencer.issue();
                        pending = Some((seq, package));
                        deadline = Some(Instant::now() + debounce);
                        view.send_replace(RateView { seq, state: RateState::Pending });
                    }
                    Some(Command::Package { has_selection: false, .. }) | Some(Command::Cancel) => {
                        pending = None;
                        deadline = None;
                        let seq = sequencer.issue();
                        view.send_replace(RateView { seq, state: RateState::Idle });
                    }
                    None => break,
                }
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                if let Some((seq, package)) = pending.take() {
                    tracing::debug!("Requesting quotes for order {} (seq {})", order_id, seq);
                    let aggregator = aggregator.clone();
                    in_flight = Some((seq, Box::pin(async move {
                        aggregator.quote_active(order_id, &package).await
                    })));
                }
            }
            (seq, result) = next_result(&mut in_flight) => {
                in_flight = None;
                if !sequencer.is_current(seq) {
                    tracing::debug!("Discarding stale quotes (seq {})", seq);
                    continue;
                }
                let state = match result {
                    Ok(board) => RateState::Ready(board),
                    Err(err) => RateState::Failed(err.to_string()),
                };
                view.send_replace(RateView { seq, state });
            }
        }
    }
}
