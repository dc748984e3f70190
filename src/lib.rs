//! hclust: whole-brain connectivity-based hierarchical parcellation.
//!
//! From per-voxel compact probabilistic tractograms this crate computes a
//! blocked pairwise dissimilarity matrix under a RAM budget, models and
//! repairs the hierarchical tree built over the same seed voxels, extracts
//! partitions of that tree under several quality criteria, and matches
//! partitions across trees (with color coordination).

pub mod constants;
mod error;

pub mod core;
pub mod distance;
pub mod io;
pub mod matching;
pub mod partition;
pub mod utils;

pub use crate::core::coordinate::{Coordinate, Grid};
pub use crate::core::node::{Node, NodeId, NodeKind};
pub use crate::core::surgery::{MonotonicityMode, TreeSurgeon};
pub use crate::core::tree::Tree;
pub use error::{Error, Result};
