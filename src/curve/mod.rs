//! Space-filling curve codec
//!
//! Maps N-dimensional integer coordinates onto a single 128-bit total order
//! and maps axis-aligned boxes back to the key spans that cover them.
//!
//! # Invariants
//!
//! - `decode(encode(v)) == v` for every coordinate vector the curve accepts
//! - Spans returned by `region_to_ranges` are sorted and disjoint and cover
//!   every point inside the box

mod codec;
mod errors;
mod key;
mod region;

pub use codec::CurveCodec;
pub use errors::{CurveError, CurveErrorCode, CurveResult};
pub use key::{max_key, CoordinateVector, KeySpan, SpatialKey, MAX_BITS_PER_DIM, MAX_KEY_BITS};
pub use region::coalesce;
