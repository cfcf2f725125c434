mod entry;
mod month;

pub use entry::{CandidateEntry, Direction, Entry, ValidState};
pub use month::ArchiveMonth;
