//! The per-client append-only register: path-ordered metadata history, journal, and the
//! three-file commit protocol.

pub mod commit;
pub mod pathcmp;
pub mod reader;
pub mod record;
pub mod writer;

pub use commit::{ClientPaths, SearchStatus};
pub use pathcmp::compare_paths;
pub use reader::{Entry, Fetched, RegisterReader};
pub use record::Line;
pub use writer::RegisterWriter;
