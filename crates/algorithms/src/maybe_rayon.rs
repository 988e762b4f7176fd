/// Switch between rayon and plain iterators for per-pixel work.
///
/// With the `parallel` feature the per-pixel loops (chi-square survival,
/// band normalization) fan out over rayon's pool. Without it the same call
/// sites compile against the sequential stand-in below, so results do not
/// depend on the feature.
#[cfg(feature = "parallel")]
pub use rayon::prelude::*;

#[cfg(not(feature = "parallel"))]
mod sequential {
    /// Sequential stand-in for `rayon::prelude::IntoParallelIterator`.
    ///
    /// `into_par_iter()` forwards to `into_iter()`, so the rest of the chain
    /// (`.map()`, `.flat_map()`, `.collect()`) resolves to `Iterator` methods.
    pub trait IntoParallelIterator {
        type Iter;
        type Item;
        fn into_par_iter(self) -> Self::Iter;
    }

    impl<I: IntoIterator> IntoParallelIterator for I {
        type Iter = I::IntoIter;
        type Item = I::Item;
        fn into_par_iter(self) -> Self::Iter {
            self.into_iter()
        }
    }
}

#[cfg(not(feature = "parallel"))]
pub use sequential::*;
