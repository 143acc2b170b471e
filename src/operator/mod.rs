//! Composite operators built around a sparse matrix: the bordered
//! `[A V; W' C]` and the projection `V'AV`.

pub mod augmented;
pub mod projected;

pub use augmented::AugmentedMatrix;
pub use projected::ProjectedOperator;
