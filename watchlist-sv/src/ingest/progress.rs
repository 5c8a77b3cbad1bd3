//! Progress events for long imports. The HTTP layer drains the receiving end
//! as a Server-Sent Events stream.

use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use log::{debug, warn};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Clone, Debug)]
pub struct Events {
    tx: UnboundedSender<Value>,
}

impl Events {
    pub fn channel() -> (Events, UnboundedReceiver<Value>) {
        let (tx, rx) = unbounded();
        (Events { tx }, rx)
    }

    pub fn send<T: Serialize>(&self, event: &T) {
        let value = match serde_json::to_value(event) {
            Ok(v) => v,
            Err(err) => {
                warn!("could not serialize progress event: {}", err);
                return;
            }
        };
        if self.tx.unbounded_send(value).is_err() {
            debug!("progress listener disconnected");
        }
    }

    /// A terminal failure event.
    pub fn error(&self, message: String) {
        warn!("{}", message);
        self.send(&json!({"error": message, "done": true}));
    }
}

/// Row counts reported while a watchlist CSV is stored.
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<usize>,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Progress {
    pub fn new(total: usize) -> Progress {
        Progress { total, ..Progress::default() }
    }

    pub fn finish(&mut self, message: String) {
        self.current = self.total;
        self.done = true;
        self.message = Some(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_reach_the_receiver() {
        let (events, mut rx) = Events::channel();
        let mut progress = Progress::new(2);
        progress.current = 1;
        progress.processed = 1;
        events.send(&progress);
        events.error("Error processing CSV: boom".to_string());

        let first = rx.try_next().unwrap().unwrap();
        assert_eq!(first, json!({"current": 1, "total": 2, "processed": 1, "skipped": 0, "done": false}));
        let last = rx.try_next().unwrap().unwrap();
        assert_eq!(last["done"], json!(true));
        assert_eq!(last["error"], json!("Error processing CSV: boom"));
    }

    #[test]
    fn sending_after_disconnect_is_harmless() {
        let (events, rx) = Events::channel();
        drop(rx);
        events.send(&Progress::new(1));
    }

    #[test]
    fn finished_progress_reports_message() {
        let mut progress = Progress::new(3);
        progress.removed = Some(1);
        progress.finish("Added 2 movies, removed 1 movies".to_string());

        let body = serde_json::to_value(&progress).unwrap();
        assert_eq!(body["current"], json!(3));
        assert_eq!(body["removed"], json!(1));
        assert_eq!(body["message"], json!("Added 2 movies, removed 1 movies"));
    }
}
