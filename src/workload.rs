//! Workload documents describing an operator's iteration space.
//!
//! A [`Workload`] has two regions. The `shape` region is an abstract schema:
//! named iteration dimensions, derived coefficients and one data-space per
//! tensor operand describing how iteration coordinates project onto the
//! operand's index space. The `instance` region binds the dimensions of the
//! schema to concrete sizes for one layer.
//!
//! The serialized field names (`dimensions`, `coefficients`, `data-spaces`,
//! `projection`, `read-write`, `default` ...) are the vocabulary expected by
//! the downstream mapping tool and must not change.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A workload document for one operator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub shape: ProblemShape,
    pub instance: Instance,
}

impl Workload {
    /// Return the data-space with a given name.
    pub fn data_space(&self, name: &str) -> Option<&DataSpace> {
        self.shape.data_spaces.iter().find(|ds| ds.name == name)
    }

    /// Return the coefficient with a given name.
    pub fn coefficient(&self, name: &str) -> Option<&Coefficient> {
        self.shape.coefficients.iter().find(|c| c.name == name)
    }

    /// Return the instance bounds, or `None` if the instance is a constraint
    /// expression.
    pub fn bounds(&self) -> Option<&BTreeMap<String, usize>> {
        match &self.instance {
            Instance::Bounds(bounds) => Some(bounds),
            Instance::Constraint(_) => None,
        }
    }

    /// Return the bound for a single dimension or coefficient.
    pub fn bound(&self, name: &str) -> Option<usize> {
        self.bounds().and_then(|b| b.get(name)).copied()
    }

    /// Set the bound of a dimension or coefficient.
    ///
    /// If the instance is currently a constraint expression it is replaced
    /// by an empty set of bounds first.
    pub fn set_bound(&mut self, name: &str, size: usize) {
        if let Instance::Constraint(_) = self.instance {
            self.instance = Instance::default();
        }
        if let Instance::Bounds(bounds) = &mut self.instance {
            bounds.insert(name.to_string(), size);
        }
    }

    /// Return the data-space with a given name for modification.
    pub fn data_space_mut(&mut self, name: &str) -> Option<&mut DataSpace> {
        self.shape.data_spaces.iter_mut().find(|ds| ds.name == name)
    }

    /// Wrap the document in the `problem` envelope used in workload files.
    pub fn as_problem(&self) -> Problem<'_> {
        Problem { problem: self }
    }
}

/// Top-level envelope of a workload file.
#[derive(Serialize)]
pub struct Problem<'a> {
    pub problem: &'a Workload,
}

/// Abstract dimension-algebra schema of a workload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProblemShape {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub dimensions: Vec<String>,

    /// Helper scalars computed once from the layer parameters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coefficients: Vec<Coefficient>,

    #[serde(rename = "data-spaces")]
    pub data_spaces: Vec<DataSpace>,
}

/// A named scalar used in projections.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coefficient {
    pub name: String,
    pub default: usize,
}

impl Coefficient {
    pub fn new(name: &str, default: usize) -> Self {
        Coefficient {
            name: name.to_string(),
            default,
        }
    }
}

/// One tensor operand of a workload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataSpace {
    pub name: String,
    pub projection: Projection,

    /// True if the operand is both read and written (eg. an accumulator).
    #[serde(rename = "read-write", default, skip_serializing_if = "is_false")]
    pub read_write: bool,
}

fn is_false(x: &bool) -> bool {
    !*x
}

/// Mapping from iteration coordinates to a data-space's coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Projection {
    /// One affine expression per data-space axis. Each expression is a sum of
    /// terms.
    Affine(Vec<Vec<Term>>),

    /// A free-form expression list such as `[ floor(A/4)%2, A%4 ]`, used where
    /// the mapping is not affine.
    Expr(String),
}

impl Projection {
    /// Projection where data-space axis `i` is indexed by dimension `dims[i]`.
    pub fn identity<S: AsRef<str>>(dims: &[S]) -> Self {
        Projection::Affine(dims.iter().map(|d| vec![Term::dim(d.as_ref())]).collect())
    }

    /// Return the affine axes of the projection, if it is affine.
    pub fn axes(&self) -> Option<&[Vec<Term>]> {
        match self {
            Projection::Affine(axes) => Some(axes),
            Projection::Expr(_) => None,
        }
    }
}

/// A term in an affine projection: an iteration dimension, optionally scaled
/// by a named coefficient.
///
/// Serialized as `[dim]` or `[dim, coefficient]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Term {
    pub dim: String,
    pub coefficient: Option<String>,
}

impl Term {
    pub fn dim(dim: &str) -> Self {
        Term {
            dim: dim.to_string(),
            coefficient: None,
        }
    }

    pub fn scaled(dim: &str, coefficient: &str) -> Self {
        Term {
            dim: dim.to_string(),
            coefficient: Some(coefficient.to_string()),
        }
    }
}

impl From<Term> for Vec<String> {
    fn from(term: Term) -> Vec<String> {
        let mut parts = vec![term.dim];
        parts.extend(term.coefficient);
        parts
    }
}

/// Error when a projection term has the wrong number of parts.
#[derive(Debug)]
pub struct InvalidTerm(usize);

impl fmt::Display for InvalidTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "projection term must have 1 or 2 parts but has {}",
            self.0
        )
    }
}

impl TryFrom<Vec<String>> for Term {
    type Error = InvalidTerm;

    fn try_from(parts: Vec<String>) -> Result<Term, InvalidTerm> {
        let len = parts.len();
        let mut parts = parts.into_iter();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(dim), coefficient, None) => Ok(Term { dim, coefficient }),
            _ => Err(InvalidTerm(len)),
        }
    }
}

/// Concrete sizes which instantiate a workload's schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Instance {
    /// Map of dimension (or coefficient) name to size.
    Bounds(BTreeMap<String, usize>),

    /// Constraint expression such as `0 <= A < 6 and 0 <= B < 4`, used when
    /// the iteration space is described symbolically.
    Constraint(String),
}

impl Default for Instance {
    fn default() -> Self {
        Instance::Bounds(BTreeMap::new())
    }
}

impl<S: Into<String>> FromIterator<(S, usize)> for Instance {
    fn from_iter<I: IntoIterator<Item = (S, usize)>>(iter: I) -> Self {
        Instance::Bounds(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}
