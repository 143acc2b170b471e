//! Core traits and dense helpers shared by every component.

pub mod traits;
pub mod wrappers;

pub use traits::{BorderedOperator, Operator, RowMatrix};
