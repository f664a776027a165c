pub mod catalog;
pub mod events;

pub use catalog::ItemCatalog;
pub use events::{window_start, EventSource, InMemoryEventSource, JsonLinesEventSource};
