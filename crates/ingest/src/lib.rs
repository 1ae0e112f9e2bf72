mod parser;
mod pipeline;
mod types;

pub use parser::{ParsedLine, events_from_reader, parse_line};
pub use pipeline::ingest_dir;
pub use types::{IngestError, IngestIssue, IngestOutcome, IngestStats, ParsedBatch, Result};
