use std::time::Duration;

use tokio::sync::watch;

pub mod chunker;
pub mod coordinator;
pub mod detector;
pub mod embedding_worker;
pub mod entity_resolution;
pub mod ner;
pub mod outbox_worker;
pub mod parsers;
pub mod pii;
pub mod reindex;
pub mod retry;
pub mod watcher;

/// Sleep for `delay` unless the stop flag fires first. Returns true when the
/// caller should wind down.
pub(crate) async fn sleep_or_stop(delay: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = stop.changed() => true,
    }
}
