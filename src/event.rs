use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Input events for watch mode
#[derive(Debug)]
pub enum Event {
  /// One line of input
  Line(String),
  /// Input ended
  Closed,
}

/// Event handler that turns stdin lines into events
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // Spawn stdin reader
    tokio::spawn(async move {
      let mut lines = BufReader::new(tokio::io::stdin()).lines();
      loop {
        match lines.next_line().await {
          Ok(Some(line)) => {
            if tx.send(Event::Line(line)).is_err() {
              break;
            }
          }
          Ok(None) => {
            let _ = tx.send(Event::Closed);
            break;
          }
          Err(e) => {
            tracing::warn!(error = %e, "Failed to read input");
            let _ = tx.send(Event::Closed);
            break;
          }
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
