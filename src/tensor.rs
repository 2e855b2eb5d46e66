//! Pixel tensors and the ledger that tracks their lifetime.
//!
//! Every tensor created by the pipeline holds a lease on a [`TensorLedger`].
//! The lease is returned when the tensor is released or dropped, so the
//! ledger can tell whether any tensor outlived the run that produced it.

use ndarray::{Array3, ArrayView3};
use serde::Deserialize;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Pixel extent of an image or tensor.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Default)]
struct LedgerCounts {
    created: AtomicUsize,
    released: AtomicUsize,
}

/// Shared counter of tensor acquisitions and releases.
#[derive(Debug, Clone, Default)]
pub struct TensorLedger {
    counts: Arc<LedgerCounts>,
}

impl TensorLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> usize {
        self.counts.created.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.counts.released.load(Ordering::SeqCst)
    }

    /// Tensors acquired and not yet released.
    pub fn live(&self) -> usize {
        self.created().saturating_sub(self.released())
    }

    fn acquire(&self) -> TensorLease {
        self.counts.created.fetch_add(1, Ordering::SeqCst);
        TensorLease {
            counts: self.counts.clone(),
        }
    }
}

#[derive(Debug)]
struct TensorLease {
    counts: Arc<LedgerCounts>,
}

impl Drop for TensorLease {
    fn drop(&mut self) {
        self.counts.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Dense `[height, width, 3]` pixel buffer.
#[derive(Debug)]
pub struct PixelTensor<T> {
    data: Array3<T>,
    _lease: TensorLease,
}

impl<T> PixelTensor<T> {
    pub fn new(ledger: &TensorLedger, data: Array3<T>) -> Self {
        Self {
            data,
            _lease: ledger.acquire(),
        }
    }

    pub fn size(&self) -> Size {
        let (height, width, _) = self.data.dim();
        Size::new(width as u32, height as u32)
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn view(&self) -> ArrayView3<'_, T> {
        self.data.view()
    }

    /// Frees the buffer and returns the lease to the ledger.
    pub fn release(self) {
        tracing::trace!("Releasing {} tensor", self.size());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_tracks_release_and_drop() {
        let ledger = TensorLedger::new();
        let first = PixelTensor::new(&ledger, Array3::<u8>::zeros((4, 6, 3)));
        let second = PixelTensor::new(&ledger, Array3::<f32>::zeros((2, 2, 3)));
        assert_eq!(ledger.created(), 2);
        assert_eq!(ledger.live(), 2);

        first.release();
        assert_eq!(ledger.live(), 1);

        drop(second);
        assert_eq!(ledger.live(), 0);
        assert_eq!(ledger.released(), 2);
    }

    #[test]
    fn test_size_reads_height_width_order() {
        let ledger = TensorLedger::new();
        let tensor = PixelTensor::new(&ledger, Array3::<u8>::zeros((48, 64, 3)));
        assert_eq!(tensor.size(), Size::new(64, 48));
        assert_eq!(tensor.shape(), &[48, 64, 3]);
    }
}
