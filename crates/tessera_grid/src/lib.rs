//! TESSERA Region Algebra
//!
//! Set-theoretic operations on axis-aligned, half-open n-dimensional
//! intervals. Buffers and iteration spaces are 1-, 2-, or 3-dimensional;
//! internally everything is normalized to three axes with unused extents
//! set to 1 (and unused offsets to 0), matching the wire representation.
//!
//! All operations are pure and return canonical values.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod extent;
pub mod region;
pub mod subrange;
pub mod tile;

pub use extent::Extent;
pub use region::Region;
pub use subrange::Subrange;
pub use tile::Tile;
