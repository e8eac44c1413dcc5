//! Wires sources, the queue and the renderer together and runs the shutdown
//! sequence.

use std::future::Future;
use std::io::{self, Write};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinError;
use tracing::{debug, warn};

use crate::config::{Registry, Source};
use crate::fanin::{self, FanIn, Record};
use crate::render::{Layout, Renderer};
use crate::tail::{Tail, TailHandle};
use crate::Error;

/// Every followed source, with its producer task already running.
#[derive(Debug)]
pub struct Multiplexer {
    fanin: FanIn,
    records: mpsc::Receiver<Record>,
    tails: Vec<TailHandle>,
}

impl Multiplexer {
    /// Creates a multiplexer with no sources and a queue of `capacity` records.
    pub fn new(capacity: usize) -> Self {
        let (fanin, records) = fanin::queue(capacity);

        Multiplexer {
            fanin,
            records,
            tails: Vec::new(),
        }
    }

    /// Starts following every source of `registry` from its current end.
    ///
    /// Sources that cannot be followed are reported and skipped.
    pub async fn open(registry: &Registry, capacity: usize) -> Self {
        let mut mux = Multiplexer::new(capacity);

        for source in registry {
            if let Err(e) = mux.follow(Arc::clone(source)).await {
                warn!(source = source.name(), path = source.path(), error = %e, "skipping source");
            }
        }
        if mux.fanin.is_empty() && !registry.is_empty() {
            warn!("none of the configured sources can be followed");
        }

        mux
    }

    /// Starts following the file behind `source`.
    pub async fn follow(&mut self, source: Arc<Source>) -> Result<(), Error> {
        let (tail, handle) = Tail::open(source.path()).await?;
        debug!(source = source.name(), path = %tail.path().display(), "following");

        self.fanin.attach(source, tail.into_stream());
        self.tails.push(handle);

        Ok(())
    }

    /// Number of sources feeding the queue.
    pub fn len(&self) -> usize {
        self.fanin.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fanin.is_empty()
    }

    /// Renders records to `out` until `shutdown` resolves, then stops the
    /// renderer, stops every tail and waits for all producers to exit.
    ///
    /// Once every source has ended the renderer finishes, but the run still
    /// lasts until `shutdown`. If writing to `out` fails, shutdown starts right
    /// away and the write error is returned once it completes.
    pub async fn run<W, F>(self, layout: Layout, out: W, shutdown: F) -> Result<(), Error>
    where
        W: Write + Send + 'static,
        F: Future<Output = ()>,
    {
        let Multiplexer {
            fanin,
            records,
            tails,
        } = self;

        // The queue closes as soon as the last producer exits.
        let producers = tokio::spawn(fanin.join());

        let (stop_tx, stop_rx) = oneshot::channel();
        let mut renderer = tokio::spawn(Renderer::new(out, layout).run(records, stop_rx));

        tokio::pin!(shutdown);
        let finished = tokio::select! {
            _ = &mut shutdown => None,
            joined = &mut renderer => Some(rendered(joined)),
        };
        if let Some(Ok(())) = &finished {
            debug!("every source is gone, waiting for shutdown");
            shutdown.await;
        }

        debug!("shutting down");
        let _ = stop_tx.send(());
        for tail in &tails {
            tail.stop();
        }
        match producers.await {
            Ok(outcomes) => debug!(producers = outcomes.len(), "producers finished"),
            Err(e) => warn!(error = %e, "producers did not finish"),
        }

        match finished {
            Some(res) => res,
            None => rendered(renderer.await),
        }
    }
}

fn rendered<W>(joined: Result<io::Result<Renderer<W>>, JoinError>) -> Result<(), Error> {
    match joined {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => {
            warn!(error = %e, "rendering failed");
            Err(Error::Io(e))
        }
        Err(e) => Err(Error::Io(io::Error::new(io::ErrorKind::Other, e))),
    }
}
