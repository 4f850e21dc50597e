pub mod chunker;
pub mod headings;
pub mod html;
pub mod loader;
pub mod office;
pub mod parser;

pub use chunker::{TextChunk, TextChunker};
pub use loader::{mime_type_for, validate_file_content, FileType};
pub use parser::{DocMetadata, DocumentParser, ParsedDocument, Section};
