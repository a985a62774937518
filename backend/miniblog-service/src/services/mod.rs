/// Business logic layer
///
/// Services own the write-path ordering: commit to the store, update the
/// cache (inside [`crate::cache::CachedPostStore`]), then publish the feed
/// event. Fan-out itself happens asynchronously in [`crate::workers`].
pub mod feed;
pub mod posts;
pub mod subscriptions;

pub use feed::FeedService;
pub use posts::PostService;
pub use subscriptions::SubscriptionService;
