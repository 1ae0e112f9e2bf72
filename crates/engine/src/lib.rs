pub mod aggregation;
pub mod quota;

pub use aggregation::{AggregationEngine, SnapshotQuery};
pub use quota::{MemoryLimits, MemoryQuotaStore, QuotaEnforcer, QuotaError, Result};
