//! Following a single file from its current end, line by line.

use std::collections::VecDeque;
use std::fs::Metadata;
use std::io::{self, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::fs::{metadata, File};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::watch;
use tracing::debug;

use crate::events::{Change, FileEvents};
use crate::Error;

/// Most lines read ahead of the consumer; the rest stays on disk.
const READ_BATCH: usize = 64;

/// Identifies the file behind a path, to tell a rotated file from the one
/// already open.
#[cfg(unix)]
type FileId = (u64, u64);
#[cfg(not(unix))]
type FileId = ();

#[cfg(unix)]
fn file_id(metadata: &Metadata) -> Option<FileId> {
    use std::os::unix::fs::MetadataExt;

    Some((metadata.dev(), metadata.ino()))
}

#[cfg(not(unix))]
fn file_id(_metadata: &Metadata) -> Option<FileId> {
    None
}

struct Opened {
    reader: BufReader<File>,
    id: Option<FileId>,
    pos: u64,
}

async fn open_reader(path: &Path, from_end: bool) -> io::Result<Opened> {
    let mut file = File::open(path).await?;
    let metadata = file.metadata().await?;
    if metadata.is_dir() {
        return Err(io::Error::new(io::ErrorKind::Other, "is a directory"));
    }

    let pos = if from_end {
        file.seek(SeekFrom::End(0)).await?
    } else {
        0
    };

    Ok(Opened {
        reader: BufReader::new(file),
        id: file_id(&metadata),
        pos,
    })
}

/// Strips the line terminator and decodes the line, replacing invalid UTF-8.
fn take_line(buf: &mut Vec<u8>) -> String {
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    let line = String::from_utf8_lossy(buf).into_owned();
    buf.clear();

    line
}

/// Stops a [`Tail`] from another task.
///
/// Dropping every handle of a tail also stops it.
#[derive(Clone, Debug)]
pub struct TailHandle {
    stop: Arc<watch::Sender<bool>>,
}

impl TailHandle {
    /// Ends the tail's line sequence. Its file and watch are released once the
    /// tail (or its stream) is dropped by the consumer.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }
}

/// A subscription to the lines appended to one file.
///
/// Lines are yielded in the order they were written. Only complete,
/// newline-terminated lines are yielded; a trailing partial line is held back
/// until the rest of it arrives. Truncation in place and replacement of the
/// file (rotation) restart reading from the beginning of the new contents.
pub struct Tail {
    events: FileEvents,
    reader: BufReader<File>,
    id: Option<FileId>,
    /// Bytes consumed from the current file.
    pos: u64,
    partial: Vec<u8>,
    ready: VecDeque<String>,
    /// The path now names another file, or the open one shrank; switch once
    /// the open one is drained.
    rotated: bool,
    stop: watch::Receiver<bool>,
}

impl std::fmt::Debug for Tail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tail")
            .field("events", &self.events)
            .field("pos", &self.pos)
            .field("partial", &self.partial.len())
            .field("ready", &self.ready.len())
            .field("rotated", &self.rotated)
            .finish()
    }
}

impl Tail {
    /// Starts following `path` from its current end.
    ///
    /// Fails if the file cannot be opened or watched, e.g. when it is missing,
    /// unreadable, or a directory.
    pub async fn open(path: impl AsRef<Path>) -> Result<(Tail, TailHandle), Error> {
        // Watch before opening so no write after the seek goes unnoticed.
        let events = FileEvents::new(path)?;
        let Opened { reader, id, pos } = open_reader(events.path(), true).await?;
        debug!(path = %events.path().display(), pos, "following");

        let (tx, rx) = watch::channel(false);
        let tail = Tail {
            events,
            reader,
            id,
            pos,
            partial: Vec::new(),
            ready: VecDeque::new(),
            rotated: false,
            stop: rx,
        };

        Ok((tail, TailHandle { stop: Arc::new(tx) }))
    }

    pub fn path(&self) -> &Path {
        self.events.path()
    }

    /// Waits for the next line.
    ///
    /// Returns `Ok(None)` once the tail has been stopped.
    pub async fn next_line(&mut self) -> Result<Option<String>, Error> {
        loop {
            if *self.stop.borrow() {
                return Ok(None);
            }
            if let Some(line) = self.ready.pop_front() {
                return Ok(Some(line));
            }

            // Bytes left unread by an earlier batch raise no new event.
            self.fill().await?;
            if !self.ready.is_empty() {
                continue;
            }

            let change = tokio::select! {
                biased;
                _ = self.stop.changed() => return Ok(None),
                change = self.events.next_change() => change,
            };

            match change {
                Some(change) => self.apply(change?).await?,
                None => return Ok(None),
            }
        }
    }

    /// Turns the tail into a stream of lines. The stream ends when the tail is
    /// stopped, or right after yielding an error.
    pub fn into_stream(self) -> BoxStream<'static, Result<String, Error>> {
        stream::unfold(Some(self), |state| async move {
            let mut tail = state?;
            match tail.next_line().await {
                Ok(Some(line)) => Some((Ok(line), Some(tail))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed()
    }

    async fn apply(&mut self, change: Change) -> Result<(), Error> {
        let current = match metadata(self.path()).await {
            Ok(current) => current,
            // Gone again already; a later create will bring it back.
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let replaced = match (file_id(&current), self.id) {
            (Some(now), Some(open)) => now != open,
            // Without file identities only a create tells a new file apart.
            _ => change == Change::Created,
        };

        if replaced || current.len() < self.pos {
            self.rotated = true;
        }

        Ok(())
    }

    /// Reads the next batch of lines, moving on to the file currently at the
    /// path once a rotated one is drained.
    async fn fill(&mut self) -> Result<(), Error> {
        loop {
            let drained = self.read_batch().await?;
            if !drained || !self.rotated {
                return Ok(());
            }
            self.reopen().await?;
        }
    }

    /// Switches to the file currently at the path, reading it from the start.
    async fn reopen(&mut self) -> Result<(), Error> {
        self.rotated = false;

        let opened = match open_reader(self.events.path(), false).await {
            Ok(opened) => opened,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %self.path().display(), "reopened");

        self.reader = opened.reader;
        self.id = opened.id;
        self.pos = opened.pos;
        self.partial.clear();

        Ok(())
    }

    /// Reads lines until [`READ_BATCH`] are waiting. Returns whether the end
    /// of the open file was reached.
    async fn read_batch(&mut self) -> Result<bool, Error> {
        while self.ready.len() < READ_BATCH {
            let read = self.reader.read_until(b'\n', &mut self.partial).await?;
            if read == 0 {
                return Ok(true);
            }
            self.pos += read as u64;

            if self.partial.last() == Some(&b'\n') {
                self.ready.push_back(take_line(&mut self.partial));
            }
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::fs::OpenOptions;
    use tokio::io::AsyncWriteExt;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    async fn append(path: &Path, data: &[u8]) {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .unwrap();
        file.write_all(data).await.unwrap();
        file.sync_all().await.unwrap();
    }

    async fn next(tail: &mut Tail) -> String {
        timeout(WAIT, tail.next_line())
            .await
            .expect("timed out waiting for a line")
            .unwrap()
            .expect("tail ended")
    }

    #[test]
    fn test_take_line() {
        let mut buf = b"foo\r\n".to_vec();
        assert_eq!(take_line(&mut buf), "foo");
        assert!(buf.is_empty());

        let mut buf = b"bar\n".to_vec();
        assert_eq!(take_line(&mut buf), "bar");

        let mut buf = b"\xffbaz\n".to_vec();
        assert_eq!(take_line(&mut buf), "\u{fffd}baz");
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let tmp_dir = tempdir().unwrap();

        let res = Tail::open(tmp_dir.path().join("missing.log")).await;
        assert!(matches!(res, Err(Error::Io(e)) if e.kind() == io::ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_open_directory() {
        let tmp_dir = tempdir().unwrap();

        assert!(Tail::open(tmp_dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_starts_at_end() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("app.log");
        append(&path, b"old 1\nold 2\n").await;

        let (mut tail, _handle) = Tail::open(&path).await.unwrap();

        append(&path, b"new 1\nnew 2\n").await;
        assert_eq!(next(&mut tail).await, "new 1");
        assert_eq!(next(&mut tail).await, "new 2");
    }

    #[tokio::test]
    async fn test_holds_partial_line() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("app.log");
        append(&path, b"").await;

        let (mut tail, _handle) = Tail::open(&path).await.unwrap();

        append(&path, b"foo ").await;
        tokio::select!(
            _line = tail.next_line() => {
                panic!("Should not be any lines yet");
            }
            _ = tokio::time::sleep(Duration::from_millis(200)) => {}
        );

        append(&path, b"bar\nbaz\n").await;
        assert_eq!(next(&mut tail).await, "foo bar");
        assert_eq!(next(&mut tail).await, "baz");
    }

    #[tokio::test]
    async fn test_truncate_in_place() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("app.log");
        append(&path, b"").await;

        let (mut tail, _handle) = Tail::open(&path).await.unwrap();

        append(&path, b"first line before rotation\n").await;
        assert_eq!(next(&mut tail).await, "first line before rotation");

        tokio::fs::write(&path, b"").await.unwrap();
        append(&path, b"after\n").await;
        assert_eq!(next(&mut tail).await, "after");
    }

    #[tokio::test]
    async fn test_reads_ahead_in_batches() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("app.log");
        append(&path, b"").await;

        let (mut tail, _handle) = Tail::open(&path).await.unwrap();

        let body: String = (0..20_000).map(|i| format!("line {i}\n")).collect();
        append(&path, body.as_bytes()).await;

        assert_eq!(next(&mut tail).await, "line 0");
        assert!(tail.ready.len() < READ_BATCH);

        // The rest is picked up from disk without further events.
        for i in 1..20_000 {
            assert_eq!(next(&mut tail).await, format!("line {i}"));
            assert!(tail.ready.len() < READ_BATCH);
        }
    }

    #[tokio::test]
    async fn test_replaced_file_drains_old_one_first() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("app.log");
        append(&path, b"").await;

        let (mut tail, _handle) = Tail::open(&path).await.unwrap();

        let body: String = (0..500).map(|i| format!("old {i}\n")).collect();
        append(&path, body.as_bytes()).await;
        assert_eq!(next(&mut tail).await, "old 0");

        tokio::fs::rename(&path, tmp_dir.path().join("app.log.1"))
            .await
            .unwrap();
        append(&path, b"new 0\n").await;

        for i in 1..500 {
            assert_eq!(next(&mut tail).await, format!("old {i}"));
        }
        assert_eq!(next(&mut tail).await, "new 0");
    }

    #[tokio::test]
    async fn test_stop() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("app.log");
        append(&path, b"").await;

        let (mut tail, handle) = Tail::open(&path).await.unwrap();
        assert!(!handle.is_stopped());

        let waiter = tokio::spawn(async move { tail.next_line().await });
        handle.stop();
        assert!(handle.is_stopped());

        let res = timeout(WAIT, waiter).await.unwrap().unwrap();
        assert!(matches!(res, Ok(None)));
    }

    #[tokio::test]
    async fn test_stream_ends_on_stop() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("app.log");
        append(&path, b"").await;

        let (tail, handle) = Tail::open(&path).await.unwrap();
        let mut lines = tail.into_stream();

        append(&path, b"one\n").await;
        let line = timeout(WAIT, lines.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(line, "one");

        handle.stop();
        assert!(timeout(WAIT, lines.next()).await.unwrap().is_none());
    }
}
