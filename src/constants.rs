//! Hard-coded constants for hclust and its tools.

/// Smallest admissible outer block size for the distance matrix (rows per
/// block). Smaller seed sets use the seed count instead.
pub const MIN_BLOCK_SIZE: usize = 500;

/// Smallest admissible tract sub-block (tracts loaded at once).
pub const MIN_SUB_BLOCK_SIZE: usize = 10;

/// Outer block size used when the caller does not pick one.
pub const DEFAULT_BLOCK_SIZE: usize = 5000;

/// Name of the seed-to-block index file written next to the distance blocks.
pub const MATRIX_INDEX_FILENAME: &str = "roi_index.txt";

/// Marker file dropped into a tool's output folder on successful completion.
pub const SUCCESS_FILENAME: &str = "success.txt";

/// Base tolerance for monotonicity repair; the caller may scale it up to
/// 100x (1e-3).
pub const MONOTONICITY_EPSILON: f64 = 1e-5;

/// Tolerance when checking that a tree file's logfactor matches log10 of its
/// streamline count.
pub const LOG_FACTOR_TOLERANCE: f64 = 1e-5;

/// Default ceiling on the granularity explored by the optimized partition
/// scan.
pub const OPT_PART_LIMIT: usize = 500;

/// Deepest admissible branching search depth.
pub const MAX_SEARCH_DEPTH: usize = 5;
