//! The single consumer of the queue: writes headers and lines to the terminal.

use std::fmt;
use std::io::{self, Write};

use crossterm::style::{Print, ResetColor, SetBackgroundColor, SetForegroundColor};
use crossterm::{queue, terminal};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::color::{ColorStyle, Palette};
use crate::config::{Source, SourceId};
use crate::fanin::Record;
use crate::Error;

const CONTINUED: &str = " (cont)";

/// Terminal dimensions, captured once when rendering starts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Layout {
    /// Columns.
    pub width: usize,
    /// Rows.
    pub height: usize,
}

impl Layout {
    pub fn new(width: usize, height: usize) -> Self {
        Layout { width, height }
    }

    /// Queries the size of the terminal attached to the process.
    pub fn detect() -> Result<Self, Error> {
        let (columns, rows) = terminal::size().map_err(Error::TerminalSize)?;

        Ok(Layout::new(columns.into(), rows.into()))
    }
}

/// Returns the first `width - 1` characters of `line` if it is at least
/// `width` characters long, otherwise the whole line.
pub fn clip(line: &str, width: usize) -> &str {
    match line.char_indices().nth(width.saturating_sub(1)) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

#[derive(Debug, Default)]
struct RenderState {
    last: Option<SourceId>,
    /// Lines of `last` rendered since its most recent header.
    streak: usize,
}

/// Renders records as runs of lines under a per-source header.
///
/// A header is written whenever the source changes, and repeated with a
/// `(cont)` marker every `height` lines of an uninterrupted run so the source
/// stays identifiable on screen.
pub struct Renderer<W> {
    out: W,
    layout: Layout,
    palette: Palette,
    state: RenderState,
}

impl<W> fmt::Debug for Renderer<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Renderer")
            .field("layout", &self.layout)
            .field("palette", &self.palette)
            .field("state", &self.state)
            .finish()
    }
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W, layout: Layout) -> Self {
        Renderer {
            out,
            layout,
            palette: Palette::new(),
            state: RenderState::default(),
        }
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Writes one record, preceded by a header when needed.
    pub fn render(&mut self, record: &Record) -> io::Result<()> {
        let source = &record.source;
        let style = self.palette.style(source);

        if self.state.last != Some(source.id()) {
            self.header(source, style, false)?;
            self.state.streak = 1;
        } else if self.state.streak == self.layout.height {
            self.header(source, style, true)?;
            self.state.streak = 1;
        } else {
            self.state.streak += 1;
        }

        let line = if source.truncate() {
            clip(&record.line, self.layout.width)
        } else {
            record.line.as_str()
        };
        writeln!(self.out, "{}", line)?;

        self.state.last = Some(source.id());

        Ok(())
    }

    fn header(&mut self, source: &Source, style: ColorStyle, continued: bool) -> io::Result<()> {
        let marker = if continued { CONTINUED } else { "" };

        queue!(
            self.out,
            SetForegroundColor(style.fg.into()),
            SetBackgroundColor(style.bg.into()),
            Print(format!(" {}{} ", source.name(), marker)),
            ResetColor,
            SetForegroundColor(style.primary.into()),
            Print(format!(" {}", source.path())),
            ResetColor,
        )?;

        writeln!(self.out)
    }

    /// Drains `records` until `stop` fires, every producer is gone, or writing
    /// fails.
    ///
    /// Records still queued when `stop` fires are left unrendered. Dropping the
    /// stop sender counts as firing it.
    pub async fn run(
        mut self,
        mut records: mpsc::Receiver<Record>,
        mut stop: oneshot::Receiver<()>,
    ) -> io::Result<Self> {
        loop {
            let record = tokio::select! {
                biased;
                _ = &mut stop => {
                    debug!("renderer stopped");
                    break;
                }
                record = records.recv() => match record {
                    Some(record) => record,
                    None => {
                        debug!("every source is gone");
                        break;
                    }
                },
            };

            self.render(&record)?;
            self.out.flush()?;
        }

        Ok(self)
    }
}
