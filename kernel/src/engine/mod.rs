//! Reading and writing parquet data files on the local filesystem.

pub(crate) mod reader;
pub(crate) mod writer;
