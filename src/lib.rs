//! tessdb - spatial records on a simulated dataflow mesh
//!
//! Records carry an N-dimensional coordinate, interleaved onto a space-filling curve
//! and range-partitioned into tiles sized to one node's memory. Each tile
//! is searched with a learned index. Queries are broadcast over a 2D grid
//! of nodes and reduced back to the host along a fixed tree.

mod bytes;

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod curve;
pub mod index;
pub mod mesh;
pub mod observability;
pub mod partition;
pub mod storage;
