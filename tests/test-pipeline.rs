use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nexus::{Config, Layout, Multiplexer, Registry};
use tempfile::tempdir;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tokio::time;

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    /// Output so far, with styling escapes removed.
    fn plain(&self) -> String {
        let raw = String::from_utf8(self.0.lock().unwrap().clone()).unwrap();
        let mut plain = String::new();
        let mut chars = raw.chars();
        while let Some(c) = chars.next() {
            if c == '\x1b' {
                chars.by_ref().find(|&c| c == 'm');
            } else {
                plain.push(c);
            }
        }
        plain
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

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

async fn wait_for_lines(out: &SharedBuf, count: usize) -> Vec<String> {
    time::timeout(Duration::from_secs(5), async {
        loop {
            let lines: Vec<String> = out.plain().lines().map(str::to_string).collect();
            if lines.len() >= count {
                return lines;
            }
            time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("timed out waiting for output")
}

#[tokio::test]
pub async fn test_two_files() {
    let logdir = tempdir().unwrap();
    let a = logdir.path().join("a.log");
    let b = logdir.path().join("b.log");
    append(&a, b"history that is never shown\n").await;
    append(&b, b"").await;

    let doc = serde_json::json!({
        "sources": [
            { "name": "A", "path": a, "truncate": false },
            { "name": "B", "path": b, "truncate": true }
        ]
    });
    let registry = Registry::from_config(Config::from_json(&doc.to_string()).unwrap());

    let mux = Multiplexer::open(&registry, 16).await;
    assert_eq!(mux.len(), 2);

    let out = SharedBuf::default();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let run = tokio::spawn(mux.run(Layout::new(10, 24), out.clone(), async move {
        let _ = shutdown_rx.await;
    }));

    append(&a, b"hello\n").await;
    wait_for_lines(&out, 2).await;
    append(&b, b"abcdefghijkl\n").await;
    let lines = wait_for_lines(&out, 4).await;

    assert_eq!(
        lines,
        vec![
            format!(" A  {}", a.display()),
            "hello".to_string(),
            format!(" B  {}", b.display()),
            "abcdefghi".to_string(),
        ]
    );

    shutdown_tx.send(()).unwrap();
    time::timeout(Duration::from_secs(5), run)
        .await
        .expect("shutdown did not complete")
        .unwrap()
        .unwrap();
}

#[tokio::test]
pub async fn test_long_run_repeats_header() {
    let logdir = tempdir().unwrap();
    let log = logdir.path().join("app.log");
    append(&log, b"").await;

    let doc = serde_json::json!({ "sources": [ { "name": "app", "path": log } ] });
    let registry = Registry::from_config(Config::from_json(&doc.to_string()).unwrap());

    let mux = Multiplexer::open(&registry, 2).await;
    let out = SharedBuf::default();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let run = tokio::spawn(mux.run(Layout::new(80, 3), out.clone(), async move {
        let _ = shutdown_rx.await;
    }));

    let body: String = (1..=7).map(|i| format!("line {i}\n")).collect();
    append(&log, body.as_bytes()).await;

    let lines = wait_for_lines(&out, 10).await;
    let header = format!(" app  {}", log.display());
    let continued = format!(" app (cont)  {}", log.display());
    assert_eq!(
        lines,
        vec![
            header,
            "line 1".to_string(),
            "line 2".to_string(),
            "line 3".to_string(),
            continued.clone(),
            "line 4".to_string(),
            "line 5".to_string(),
            "line 6".to_string(),
            continued,
            "line 7".to_string(),
        ]
    );

    shutdown_tx.send(()).unwrap();
    time::timeout(Duration::from_secs(5), run)
        .await
        .expect("shutdown did not complete")
        .unwrap()
        .unwrap();
}

#[tokio::test]
pub async fn test_shutdown_with_full_queue() {
    let logdir = tempdir().unwrap();
    let log = logdir.path().join("busy.log");
    append(&log, b"").await;

    let doc = serde_json::json!({ "sources": [ { "name": "busy", "path": log } ] });
    let registry = Registry::from_config(Config::from_json(&doc.to_string()).unwrap());

    let mux = Multiplexer::open(&registry, 1).await;
    let run = tokio::spawn(mux.run(Layout::new(80, 24), io::sink(), async {
        time::sleep(Duration::from_millis(200)).await;
    }));

    let body: String = (0..10_000).map(|i| format!("{i}\n")).collect();
    append(&log, body.as_bytes()).await;

    time::timeout(Duration::from_secs(5), run)
        .await
        .expect("shutdown did not complete")
        .unwrap()
        .unwrap();
}
