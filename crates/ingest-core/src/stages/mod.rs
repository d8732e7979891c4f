pub mod chunking;
pub mod embedding;
pub mod loading;

pub use chunking::ChunkingStage;
pub use embedding::EmbeddingIndexingStage;
pub use loading::LoadingStage;
