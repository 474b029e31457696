//! Sharded spatial index over vehicle footprints

pub mod index;

pub use index::ShardedIndex;
