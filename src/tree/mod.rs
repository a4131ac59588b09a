//! CART decision trees used by both ensembles.

pub mod cart;
pub mod criterion;

pub use cart::{DecisionTree, Node, TreeParams};
pub use criterion::{GiniCriterion, NewtonCriterion, SplitCriterion};
