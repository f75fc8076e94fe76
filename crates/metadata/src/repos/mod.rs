//! Repository traits for metadata operations.

pub mod crawl_stats;
pub mod files;
pub mod reconcile;

pub use crawl_stats::{CrawlClaim, CrawlStatsRepo};
pub use files::FileRepo;
pub use reconcile::{ReconcileCounts, ReconcilePlan, ReconcileRepo, RenameOp};
