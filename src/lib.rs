//! Follows many log files at once and multiplexes their new lines into one
//! colorized terminal stream.
//!
//! Each source gets a deterministic color. Consecutive lines of the same
//! source are grouped under a single header, which is repeated every
//! terminal-height lines of a long run. Lines of sources configured with
//! `truncate` are cut to fit the terminal width.
//!
//! ## Example
//!
//! ```no_run
//! use nexus::{Config, Layout, Multiplexer, Registry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), nexus::Error> {
//!     let registry = Registry::from_config(Config::load("nexus.json")?);
//!     let layout = Layout::detect()?;
//!
//!     // Start following every source from its current end.
//!     let mux = Multiplexer::open(&registry, nexus::DEFAULT_CAPACITY).await;
//!
//!     // Render until Ctrl-C.
//!     mux.run(layout, std::io::stdout(), async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```
//!
//! ## Caveats
//!
//! Lines from different sources are interleaved in arrival order, not by any
//! timestamp they carry. The terminal size is read once at startup, so
//! resizing the terminal afterwards is not picked up.

mod color;
mod config;
mod error;
mod events;
mod fanin;
mod mux;
mod render;
mod tail;

pub use color::{
    contrasting_foreground, derive_style, path_color, perceived_lightness, ColorStyle, Palette,
    Rgb,
};
pub use config::{Config, Registry, Source, SourceConfig, SourceId};
pub use error::Error;
pub use events::{Change, FileEvents};
pub use fanin::{forward, queue, FanIn, Outcome, Record, DEFAULT_CAPACITY};
pub use mux::Multiplexer;
pub use render::{clip, Layout, Renderer};
pub use tail::{Tail, TailHandle};

#[cfg(doctest)]
doc_comment::doctest!("../README.md");
