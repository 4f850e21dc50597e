pub mod models;
pub mod pool;
pub mod repository;

pub use models::{
    Chunk, ChunkMetadata, Collection, CollectionWithCount, Document, DocumentStatus, NewDocument,
    NewQueryLog, QueryType,
};
pub use pool::DbPool;
pub use repository::{IngestLookup, Repository};
