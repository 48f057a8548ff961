//! The in-memory context graph and the algorithms that run over it.

pub mod store;
pub mod similarity;
pub mod clustering;

pub use store::{BatchOutcome, CompactionReport, GraphStore};
pub use similarity::{DEFAULT_LIMIT, SimilarToken, cosine_similarity, find_similar};
pub use clustering::cluster_tokens;
