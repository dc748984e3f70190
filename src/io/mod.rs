//! Readers and writers for the on-disk formats: framed-section text files
//! (tree, roi, correspondence tables, label volumes) and the binary
//! tract/distance-block store.

pub mod parser;
pub mod roi;
pub mod tract_store;
pub mod tree_file;
pub mod volume;
