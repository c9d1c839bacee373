//! Geometry helpers and symbolic expressions used to describe the iteration
//! spaces of neural network operators.
//!
//! This crate has no knowledge of workload documents. It provides the size
//! formulas used by convolution and pooling layers, broadcasting helpers, a
//! generator for iteration dimension names and a small symbolic integer
//! expression type used to describe non-affine index remappings such as
//! reshapes.

mod dim_gen;
pub mod geometry;
mod sym_expr;

pub use dim_gen::DimNameGen;
pub use geometry::{DimPadding, GeometryError, Shape};
pub use sym_expr::{EvalError, SymExpr};
