mod schema;
mod store;

pub use store::{BatchOutcome, EntryStore};
