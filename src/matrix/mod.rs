//! Matrix storage and dense helpers.

pub mod dense_utils;
pub mod gallery;
pub mod sparse;

pub use sparse::CsrMatrix;
