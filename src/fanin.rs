//! The bounded queue that funnels lines from every source into the renderer.

use std::fmt;
use std::sync::Arc;

use futures_util::stream::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Source;
use crate::Error;

/// Queue capacity used unless configured otherwise.
pub const DEFAULT_CAPACITY: usize = 1024;

/// One line delivered by a source.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Record {
    pub source: Arc<Source>,
    /// 1-based position of the line in its source's own sequence.
    pub seq: u64,
    pub line: String,
}

/// How a producer task finished.
#[derive(Debug)]
pub enum Outcome {
    /// The line stream ended, usually because its watcher was stopped.
    Ended,
    /// The line stream yielded an error and was abandoned.
    Failed(Error),
    /// The consumer went away before the stream ended.
    Disconnected,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Ended => write!(f, "ended"),
            Outcome::Failed(e) => write!(f, "failed: {}", e),
            Outcome::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Producer side of the queue: owns one forwarding task per attached source.
pub struct FanIn {
    tx: mpsc::Sender<Record>,
    producers: Vec<JoinHandle<Outcome>>,
}

impl fmt::Debug for FanIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanIn")
            .field("capacity", &self.tx.max_capacity())
            .field("producers", &self.producers.len())
            .finish()
    }
}

/// Creates a queue holding at most `capacity` records.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn queue(capacity: usize) -> (FanIn, mpsc::Receiver<Record>) {
    let (tx, rx) = mpsc::channel(capacity);

    (
        FanIn {
            tx,
            producers: Vec::new(),
        },
        rx,
    )
}

impl FanIn {
    /// Spawns a task forwarding every line of `lines` into the queue, tagged
    /// with `source`.
    pub fn attach<S>(&mut self, source: Arc<Source>, lines: S)
    where
        S: Stream<Item = Result<String, Error>> + Send + Unpin + 'static,
    {
        let tx = self.tx.clone();
        self.producers.push(tokio::spawn(forward(source, lines, tx)));
    }

    pub fn len(&self) -> usize {
        self.producers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }

    /// Waits for every producer to finish.
    ///
    /// The queue closes once the last producer exits, so a consumer draining it
    /// sees the end of the records.
    pub async fn join(self) -> Vec<Outcome> {
        let FanIn { tx, producers } = self;
        drop(tx);

        let mut outcomes = Vec::with_capacity(producers.len());
        for producer in producers {
            match producer.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(error = %e, "producer task did not finish"),
            }
        }

        outcomes
    }
}

/// Read-and-forward loop of one source.
///
/// Waits while the queue is full. Stops when the stream ends or fails, or
/// when the receiving end of the queue is gone.
pub async fn forward<S>(source: Arc<Source>, mut lines: S, tx: mpsc::Sender<Record>) -> Outcome
where
    S: Stream<Item = Result<String, Error>> + Unpin,
{
    let mut seq = 0;

    let outcome = loop {
        match lines.next().await {
            Some(Ok(line)) => {
                seq += 1;
                let record = Record {
                    source: Arc::clone(&source),
                    seq,
                    line,
                };
                if tx.send(record).await.is_err() {
                    break Outcome::Disconnected;
                }
            }
            Some(Err(e)) => break Outcome::Failed(e),
            None => break Outcome::Ended,
        }
    };

    match &outcome {
        Outcome::Ended => info!(source = source.name(), path = source.path(), lines = seq, "source ended"),
        Outcome::Failed(e) => warn!(source = source.name(), path = source.path(), lines = seq, error = %e, "source failed"),
        Outcome::Disconnected => debug!(source = source.name(), lines = seq, "queue closed"),
    }

    outcome
}
