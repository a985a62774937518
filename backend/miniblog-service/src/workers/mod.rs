/// Background workers
///
/// - `fanout`: applies feed events to the feed store
/// - `pool`: runs fan-out consumers over an event source
pub mod fanout;
pub mod pool;

pub use fanout::FanoutWorker;
pub use pool::{calculate_backoff, WorkerPool};
