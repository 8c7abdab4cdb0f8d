//! Range mappers.
//!
//! A range mapper is a pure function from a kernel chunk to the buffer
//! subrange that chunk accesses. The command graph builder re-evaluates
//! stored mappers for any chunk of the iteration space; callers must
//! clamp the result to the buffer extent before use.

use std::sync::Arc;
use tessera_grid::{Extent, Subrange};

/// A pure chunk-to-subrange function stored per `(task, buffer)` pair.
pub trait RangeMapper: Send + Sync {
    /// Dimensionality of the buffer subranges this mapper produces
    fn dimensions(&self) -> u8;

    /// Map a kernel chunk to the buffer subrange it accesses.
    ///
    /// The returned subrange is interpreted in buffer coordinates; the
    /// caller re-targets it at the buffer extent and clamps.
    fn map(&self, chunk: &Subrange) -> Subrange;
}

/// Each work item accesses the buffer element with its own index.
#[derive(Debug, Clone, Copy)]
pub struct OneToOne {
    dims: u8,
}

impl OneToOne {
    /// Create a one-to-one mapper for a buffer of the given dimensionality
    #[must_use]
    pub const fn new(dims: u8) -> Self {
        Self { dims }
    }
}

impl RangeMapper for OneToOne {
    fn dimensions(&self) -> u8 {
        self.dims
    }

    fn map(&self, chunk: &Subrange) -> Subrange {
        *chunk
    }
}

/// Every chunk accesses the whole buffer.
#[derive(Debug, Clone, Copy)]
pub struct FullExtent {
    extent: Extent,
}

impl FullExtent {
    /// Create an all-accessing mapper for the given buffer extent
    #[must_use]
    pub const fn new(extent: Extent) -> Self {
        Self { extent }
    }
}

impl RangeMapper for FullExtent {
    fn dimensions(&self) -> u8 {
        self.extent.dims()
    }

    fn map(&self, _chunk: &Subrange) -> Subrange {
        Subrange::full(&self.extent)
    }
}

/// Every chunk accesses the same fixed subrange.
#[derive(Debug, Clone, Copy)]
pub struct FixedSubrange {
    dims: u8,
    sr: Subrange,
}

impl FixedSubrange {
    /// Create a fixed mapper
    #[must_use]
    pub const fn new(dims: u8, sr: Subrange) -> Self {
        Self { dims, sr }
    }
}

impl RangeMapper for FixedSubrange {
    fn dimensions(&self) -> u8 {
        self.dims
    }

    fn map(&self, _chunk: &Subrange) -> Subrange {
        self.sr
    }
}

/// Adapter for arbitrary mapping closures.
pub struct FnMapper<F> {
    dims: u8,
    f: F,
}

impl<F> FnMapper<F>
where
    F: Fn(&Subrange) -> Subrange + Send + Sync,
{
    /// Wrap a closure as a range mapper
    pub const fn new(dims: u8, f: F) -> Self {
        Self { dims, f }
    }
}

impl<F> RangeMapper for FnMapper<F>
where
    F: Fn(&Subrange) -> Subrange + Send + Sync,
{
    fn dimensions(&self) -> u8 {
        self.dims
    }

    fn map(&self, chunk: &Subrange) -> Subrange {
        (self.f)(chunk)
    }
}

/// Convenience constructor for a shared one-to-one mapper
#[must_use]
pub fn one_to_one(dims: u8) -> Arc<dyn RangeMapper> {
    Arc::new(OneToOne::new(dims))
}

/// Convenience constructor for a shared all-accessing mapper
#[must_use]
pub fn full_extent(extent: Extent) -> Arc<dyn RangeMapper> {
    Arc::new(FullExtent::new(extent))
}
