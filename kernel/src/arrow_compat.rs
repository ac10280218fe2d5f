//! This module re-exports the versions of arrow and parquet the reader and writer are built against.

#[cfg(feature = "arrow-57")]
mod arrow_compat_shims {
    pub use arrow_57 as arrow;
    pub use parquet_57 as parquet;
}

#[cfg(all(feature = "arrow-58", not(feature = "arrow-57")))]
mod arrow_compat_shims {
    pub use arrow_58 as arrow;
    pub use parquet_58 as parquet;
}

// every module of this crate reads or writes parquet through arrow
#[cfg(not(any(feature = "arrow-58", feature = "arrow-57")))]
compile_error!("list_layout_kernel needs arrow. Please enable the `arrow-58` or `arrow-57` feature");

#[cfg(any(feature = "arrow-58", feature = "arrow-57"))]
pub use arrow_compat_shims::*;
