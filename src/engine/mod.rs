pub mod catalog;
pub mod coordinator;
pub(crate) mod fetcher;
pub mod options;
pub mod registry;
pub mod stream;
pub mod watermarks;

pub use catalog::{Topic, TopicCatalog, compare_topics};
pub use coordinator::FetchCoordinator;
pub use options::{FetchOptions, Position};
pub use registry::BrowseEngine;
pub use stream::{Message, MessageStream};
pub use watermarks::{PartitionPlan, distribute_limit, resolve_offset};
