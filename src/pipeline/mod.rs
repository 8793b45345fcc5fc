// ETL pipeline stages: fetch, normalize, deduplicate, upsert, and the
// orchestrator that sequences them.

pub mod dedup;
pub mod fetch;
pub mod normalize;
pub mod orchestrator;
pub mod quality;
pub mod upsert;

pub use dedup::{DedupReport, Deduplicator};
pub use fetch::{FetchReport, FetchSettings, Fetcher};
pub use normalize::{NormalizeReport, Normalizer};
pub use orchestrator::{Clock, PipelineOrchestrator};
pub use quality::quality_score;
pub use upsert::{UpsertReport, Upserter};
