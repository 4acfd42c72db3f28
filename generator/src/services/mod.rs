pub mod api_client;
pub mod cancellation;
pub mod controller;
pub mod enhancement;
pub mod formatting;
pub mod generation;
pub mod job_queue;
pub mod keyword_index;
pub mod rag;
pub mod scoring;
pub mod source_clients;
pub mod strategies;
pub mod vector_index;
pub mod verification;

pub use api_client::{ApiClient, ApiError, HttpMethod, RequestOptions, SourceEndpoint};
pub use cancellation::CancellationToken;
pub use controller::PostGenerationController;
pub use enhancement::{Enhancement, EnhancementContext, EnhancementError, EngagementTransform, SeoTransform, StyleTransform};
pub use generation::{GenerationInput, Generator, RemoteGenerator, TemplateGenerator};
pub use job_queue::{JobHandle, JobQueue, JobQueueError};
pub use keyword_index::{KeywordHit, KeywordIndex};
pub use rag::{RagError, RagOrchestrator, RagOutput, StrategyFailure};
pub use scoring::{merge_and_rank, DefaultScoreModel, ScoreModel, ScoreWeights};
pub use source_clients::{Embedder, EmbeddingClient, GenerationClient, SearchClient, SearchHit};
pub use strategies::{HybridStrategy, KeywordStrategy, RemoteSearchStrategy, RetrievalStrategy, SemanticStrategy};
pub use vector_index::{Cluster, ClusterResult, VectorIndex, VectorIndexError, VectorMatch, VectorOps, VectorRecord};
pub use verification::ClaimVerifier;
