pub mod archive;
pub mod text;
pub mod transcript;

pub use archive::{ArchiveEntry, TranscriptArchive};
pub use text::normalize_text;
pub use transcript::{AppendOutcome, TranscriptConfig, TranscriptStore};
