//! Operator status panel sink.
//!
//! Producers anywhere in the pipeline post short status lines; a single
//! consumer renders the most recent few to the OLED. With no panel (failed
//! init) the sink still consumes so producers are never blocked.

use std::collections::VecDeque;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Lines shown on the panel.
pub const SCREEN_LINES: usize = 4;
/// Longest line the panel shows; longer text is truncated.
pub const LINE_CHARS: usize = 20;
/// Vertical pixel pitch between lines.
pub const LINE_PITCH: i32 = 12;

const MESSAGE_QUEUE_DEPTH: usize = 32;

/// Where rendered status lines end up.
///
/// The seam between the sink and the OLED collaborator; test doubles
/// implement it to observe rendering.
pub trait StatusPanel: Send {
    /// Redraws the whole panel from `lines`, topmost first.
    fn render(&mut self, lines: &[String]) -> anyhow::Result<()>;
    /// Blanks the panel.
    fn clear(&mut self) -> anyhow::Result<()>;
}

/// Ring of the most recent status lines, oldest first.
#[derive(Debug, Default)]
struct ScreenBuffer {
    lines: VecDeque<String>,
}

impl ScreenBuffer {
    /// Appends a line, truncating it and evicting the oldest if needed.
    fn push(&mut self, line: &str) {
        self.lines.push_back(truncate_line(line));
        if self.lines.len() > SCREEN_LINES {
            self.lines.pop_front();
        }
    }

    fn lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

fn truncate_line(line: &str) -> String {
    if line.chars().count() <= LINE_CHARS {
        return line.to_string();
    }
    let mut cut: String = line.chars().take(LINE_CHARS - 3).collect();
    cut.push_str("...");
    cut
}

/// Producer side of the display queue.
#[derive(Clone)]
pub struct DisplayHandle {
    tx: mpsc::Sender<String>,
}

impl DisplayHandle {
    /// Queues a status line; dropped silently when the queue is full.
    pub fn post(&self, line: impl Into<String>) {
        let _ = self.tx.try_send(line.into());
    }
}

/// Single consumer of the display queue.
pub struct DisplaySink {
    rx: mpsc::Receiver<String>,
    panel: Option<Box<dyn StatusPanel>>,
    buffer: ScreenBuffer,
}

impl DisplaySink {
    pub fn new(panel: Option<Box<dyn StatusPanel>>) -> (DisplayHandle, DisplaySink) {
        let (tx, rx) = mpsc::channel(MESSAGE_QUEUE_DEPTH);
        (
            DisplayHandle { tx },
            DisplaySink {
                rx,
                panel,
                buffer: ScreenBuffer::default(),
            },
        )
    }

    /// Runs until every producer handle is dropped and the queue drains,
    /// then blanks the panel.
    pub async fn run(mut self) {
        info!("display sink started");
        while let Some(line) = self.rx.recv().await {
            self.show(&line);
        }
        if let Some(panel) = self.panel.as_mut() {
            if let Err(err) = panel.clear() {
                error!(%err, "failed to blank display");
            }
        }
        info!("display sink stopped");
    }

    fn show(&mut self, line: &str) {
        debug!(line, "display line");
        self.buffer.push(line);
        let Some(panel) = self.panel.as_mut() else {
            return;
        };
        if let Err(err) = panel.render(&self.buffer.lines()) {
            error!(%err, "display render failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn buffer_keeps_the_last_four_lines_in_order() {
        let mut buffer = ScreenBuffer::default();
        for n in 1..=6 {
            buffer.push(&format!("line {n}"));
        }
        assert_eq!(buffer.lines(), vec!["line 3", "line 4", "line 5", "line 6"]);
    }

    #[test]
    fn long_lines_are_truncated_with_ellipsis() {
        let mut buffer = ScreenBuffer::default();
        buffer.push("a status line that runs well past the panel edge");
        let lines = buffer.lines();
        assert_eq!(lines[0].chars().count(), LINE_CHARS);
        assert!(lines[0].ends_with("..."));
        assert_eq!(lines[0], "a status line tha...");
    }

    #[test]
    fn short_lines_pass_through_unchanged() {
        let mut buffer = ScreenBuffer::default();
        buffer.push("Rx 0x0a sn 0x0a0a");
        assert_eq!(buffer.lines(), vec!["Rx 0x0a sn 0x0a0a"]);
    }

    struct RecordingPanel {
        screens: Arc<Mutex<Vec<Vec<String>>>>,
        cleared: Arc<Mutex<bool>>,
    }

    impl StatusPanel for RecordingPanel {
        fn render(&mut self, lines: &[String]) -> anyhow::Result<()> {
            self.screens.lock().unwrap().push(lines.to_vec());
            Ok(())
        }

        fn clear(&mut self) -> anyhow::Result<()> {
            *self.cleared.lock().unwrap() = true;
            Ok(())
        }
    }

    #[tokio::test]
    async fn sink_renders_each_line_and_blanks_on_shutdown() {
        let screens = Arc::new(Mutex::new(Vec::new()));
        let cleared = Arc::new(Mutex::new(false));
        let panel = RecordingPanel {
            screens: Arc::clone(&screens),
            cleared: Arc::clone(&cleared),
        };
        let (handle, sink) = DisplaySink::new(Some(Box::new(panel)));

        handle.post("Radio initialized OK");
        handle.post("Rx 0x0a sn 0x0001");
        drop(handle);
        sink.run().await;

        let screens = screens.lock().unwrap();
        assert_eq!(screens.len(), 2);
        assert_eq!(
            screens[1],
            vec!["Radio initialized OK", "Rx 0x0a sn 0x0001"]
        );
        assert!(*cleared.lock().unwrap());
    }

    #[tokio::test]
    async fn panelless_sink_still_consumes() {
        let (handle, sink) = DisplaySink::new(None);
        for n in 0..100 {
            handle.post(format!("line {n}"));
        }
        drop(handle);
        // Must drain and return rather than block producers.
        sink.run().await;
    }
}
