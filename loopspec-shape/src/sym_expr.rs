//! Symbolic integer expressions used to describe index remappings.

use std::fmt;
use std::ops::{Add, Mul, Rem};
use std::sync::Arc;

/// Symbolic expression representing a non-negative integer index.
///
/// Expressions are built from known values, named iteration dimensions and
/// the operators needed to linearize and delinearize coordinates: addition,
/// multiplication, flooring division and remainder.
#[derive(Clone)]
pub enum SymExpr {
    /// Known integer value.
    Value(i64),
    /// Named iteration dimension.
    Var(Arc<str>),
    /// Sum of two expressions.
    Add(Arc<SymExpr>, Arc<SymExpr>),
    /// Product of two expressions.
    Mul(Arc<SymExpr>, Arc<SymExpr>),
    /// Flooring division of the first expression by the second.
    Div(Arc<SymExpr>, Arc<SymExpr>),
    /// Remainder of dividing the first expression by the second.
    Mod(Arc<SymExpr>, Arc<SymExpr>),
}

/// Errors when evaluating a symbolic expression.
#[derive(Clone, Debug, PartialEq)]
pub enum EvalError {
    /// No value was supplied for a symbol.
    UnknownSymbol(String),
    /// The expression divides by zero.
    DivideByZero,
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownSymbol(name) => write!(f, "no value for symbol \"{}\"", name),
            Self::DivideByZero => write!(f, "division by zero"),
        }
    }
}

impl std::error::Error for EvalError {}

impl SymExpr {
    /// Create a named variable.
    pub fn var(name: &str) -> Self {
        SymExpr::Var(name.into())
    }

    /// Return the flooring division of `self` by `rhs`.
    pub fn floor_div(self, rhs: SymExpr) -> Self {
        SymExpr::Div(self.into(), rhs.into())
    }

    /// Return the names of variables referenced by this expression, in the
    /// order they are first encountered.
    pub fn symbols(&self) -> Vec<&str> {
        fn collect<'a>(expr: &'a SymExpr, names: &mut Vec<&'a str>) {
            match expr {
                SymExpr::Value(_) => {}
                SymExpr::Var(name) => {
                    if !names.contains(&name.as_ref()) {
                        names.push(name);
                    }
                }
                SymExpr::Add(lhs, rhs)
                | SymExpr::Mul(lhs, rhs)
                | SymExpr::Div(lhs, rhs)
                | SymExpr::Mod(lhs, rhs) => {
                    collect(lhs, names);
                    collect(rhs, names);
                }
            }
        }
        let mut names = Vec::new();
        collect(self, &mut names);
        names
    }

    /// Evaluate the expression given values for its symbols.
    pub fn eval(&self, symbols: &[(&str, i64)]) -> Result<i64, EvalError> {
        let binop = |lhs: &SymExpr, rhs: &SymExpr| -> Result<(i64, i64), EvalError> {
            Ok((lhs.eval(symbols)?, rhs.eval(symbols)?))
        };
        match self {
            Self::Value(x) => Ok(*x),
            Self::Var(name) => symbols
                .iter()
                .find(|(sym, _)| *sym == name.as_ref())
                .map(|(_, val)| *val)
                .ok_or_else(|| EvalError::UnknownSymbol(name.to_string())),
            Self::Add(lhs, rhs) => binop(lhs, rhs).map(|(x, y)| x + y),
            Self::Mul(lhs, rhs) => binop(lhs, rhs).map(|(x, y)| x * y),
            Self::Div(lhs, rhs) => match binop(lhs, rhs)? {
                (_, 0) => Err(EvalError::DivideByZero),
                (x, y) => Ok(x.div_euclid(y)),
            },
            Self::Mod(lhs, rhs) => match binop(lhs, rhs)? {
                (_, 0) => Err(EvalError::DivideByZero),
                (x, y) => Ok(x.rem_euclid(y)),
            },
        }
    }

    /// Simplify an expression.
    ///
    /// This folds constants and removes identities (eg. `x * 1` becomes `x`
    /// and `floor(x / 1)` becomes `x`). The order of operands is preserved.
    pub fn simplify(&self) -> SymExpr {
        match self {
            Self::Value(_) | Self::Var(_) => self.clone(),
            Self::Add(lhs, rhs) => match (lhs.simplify(), rhs.simplify()) {
                (SymExpr::Value(0), rhs) => rhs,
                (lhs, SymExpr::Value(0)) => lhs,
                (SymExpr::Value(x), SymExpr::Value(y)) => SymExpr::Value(x + y),
                (lhs, rhs) => lhs + rhs,
            },
            Self::Mul(lhs, rhs) => match (lhs.simplify(), rhs.simplify()) {
                (SymExpr::Value(0), _) | (_, SymExpr::Value(0)) => SymExpr::Value(0),
                (SymExpr::Value(1), rhs) => rhs,
                (lhs, SymExpr::Value(1)) => lhs,
                (SymExpr::Value(x), SymExpr::Value(y)) => SymExpr::Value(x * y),
                (lhs, rhs) => lhs * rhs,
            },
            Self::Div(lhs, rhs) => match (lhs.simplify(), rhs.simplify()) {
                (lhs, SymExpr::Value(1)) => lhs,
                (SymExpr::Value(x), SymExpr::Value(y)) if y != 0 => {
                    SymExpr::Value(x.div_euclid(y))
                }
                (lhs, rhs) => lhs.floor_div(rhs),
            },
            Self::Mod(lhs, rhs) => match (lhs.simplify(), rhs.simplify()) {
                (_, SymExpr::Value(1)) => SymExpr::Value(0),
                (SymExpr::Value(x), SymExpr::Value(y)) if y != 0 => {
                    SymExpr::Value(x.rem_euclid(y))
                }
                (lhs, rhs) => lhs % rhs,
            },
        }
    }

    /// Return the precedence of the operator.
    ///
    /// This is used to add parentheses when formatting an expression tree.
    /// Division is formatted as a `floor(...)` call, so it never needs
    /// wrapping.
    fn precedence(&self) -> u8 {
        match self {
            Self::Value(_) | Self::Var(_) | Self::Div(..) => 3,
            Self::Mul(..) | Self::Mod(..) => 2,
            Self::Add(..) => 1,
        }
    }
}

impl PartialEq for SymExpr {
    fn eq(&self, other: &SymExpr) -> bool {
        match (self, other) {
            (Self::Value(x), Self::Value(y)) => x == y,
            (Self::Var(x), Self::Var(y)) => x == y,
            (Self::Add(a, b), Self::Add(c, d))
            | (Self::Mul(a, b), Self::Mul(c, d))
            | (Self::Div(a, b), Self::Div(c, d))
            | (Self::Mod(a, b), Self::Mod(c, d)) => a == c && b == d,
            _ => false,
        }
    }
}

impl Add<SymExpr> for SymExpr {
    type Output = SymExpr;

    fn add(self, rhs: SymExpr) -> Self {
        Self::Add(self.into(), rhs.into())
    }
}

impl Mul<SymExpr> for SymExpr {
    type Output = SymExpr;

    fn mul(self, rhs: SymExpr) -> Self {
        Self::Mul(self.into(), rhs.into())
    }
}

impl Rem<SymExpr> for SymExpr {
    type Output = SymExpr;

    fn rem(self, rhs: SymExpr) -> Self {
        Self::Mod(self.into(), rhs.into())
    }
}

impl From<i64> for SymExpr {
    fn from(val: i64) -> Self {
        SymExpr::Value(val)
    }
}

impl TryFrom<usize> for SymExpr {
    type Error = std::num::TryFromIntError;

    fn try_from(val: usize) -> Result<Self, Self::Error> {
        i64::try_from(val).map(SymExpr::Value)
    }
}

impl<'a> From<&'a str> for SymExpr {
    fn from(name: &'a str) -> Self {
        SymExpr::var(name)
    }
}

/// Format an operand, wrapping it in parentheses if it binds less tightly
/// than `min_prec`.
///
/// Operands of equal precedence on the right of a non-associative operator
/// (`%`, `/`) still need parentheses, so callers pass a higher `min_prec` for
/// those.
fn operand(f: &mut fmt::Formatter<'_>, expr: &SymExpr, min_prec: u8) -> fmt::Result {
    if expr.precedence() < min_prec {
        write!(f, "({})", expr)
    } else {
        write!(f, "{}", expr)
    }
}

impl fmt::Display for SymExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(val) => write!(f, "{}", val),
            Self::Var(name) => write!(f, "{}", name),
            Self::Add(lhs, rhs) => {
                operand(f, lhs, 1)?;
                write!(f, " + ")?;
                operand(f, rhs, 1)
            }
            Self::Mul(lhs, rhs) => {
                operand(f, lhs, 2)?;
                write!(f, "*")?;
                operand(f, rhs, 2)
            }
            Self::Mod(lhs, rhs) => {
                operand(f, lhs, 2)?;
                write!(f, "%")?;
                operand(f, rhs, 3)
            }
            Self::Div(lhs, rhs) => {
                write!(f, "floor(")?;
                operand(f, lhs, 2)?;
                write!(f, "/")?;
                operand(f, rhs, 3)?;
                write!(f, ")")
            }
        }
    }
}

impl fmt::Debug for SymExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[cfg(test)]
mod tests {
    use loopspec_testing::TestCases;

    use super::{EvalError, SymExpr};

    #[test]
    fn test_display() {
        #[derive(Debug)]
        struct Case {
            expr: SymExpr,
            expected: &'static str,
        }

        let a = SymExpr::var("A");
        let b = SymExpr::var("B");
        let linear = a.clone() * 4i64.into() + b.clone();

        let cases = [
            Case {
                expr: linear.clone(),
                expected: "A*4 + B",
            },
            Case {
                expr: linear.clone().floor_div(12i64.into()) % 2i64.into(),
                expected: "floor((A*4 + B)/12)%2",
            },
            Case {
                expr: linear.clone() % 4i64.into(),
                expected: "(A*4 + B)%4",
            },
            Case {
                expr: a.clone() * (b.clone() + 1i64.into()),
                expected: "A*(B + 1)",
            },
            Case {
                expr: a.clone() % (b.clone() % 3i64.into()),
                expected: "A%(B%3)",
            },
        ];

        cases.test_each(|case| {
            assert_eq!(case.expr.to_string(), case.expected);
        });
    }

    #[test]
    fn test_simplify() {
        #[derive(Debug)]
        struct Case {
            expr: SymExpr,
            expected: SymExpr,
        }

        let a = SymExpr::var("A");

        let cases = [
            Case {
                expr: a.clone() * 1i64.into(),
                expected: a.clone(),
            },
            Case {
                expr: SymExpr::from(0i64) + a.clone(),
                expected: a.clone(),
            },
            Case {
                expr: a.clone().floor_div(1i64.into()),
                expected: a.clone(),
            },
            Case {
                expr: a.clone() % 1i64.into(),
                expected: SymExpr::Value(0),
            },
            Case {
                expr: SymExpr::from(7i64).floor_div(2i64.into()) % 3i64.into(),
                expected: SymExpr::Value(0),
            },
            Case {
                expr: (a.clone() * 1i64.into()).floor_div(6i64.into()),
                expected: a.clone().floor_div(6i64.into()),
            },
        ];

        cases.test_each(|case| {
            assert_eq!(case.expr.simplify(), case.expected);
        });
    }

    #[test]
    fn test_eval() {
        let expr = (SymExpr::var("A") * 4i64.into() + SymExpr::var("B")).floor_div(4i64.into())
            % 3i64.into();
        assert_eq!(expr.eval(&[("A", 5), ("B", 3)]), Ok(2));
        assert_eq!(expr.symbols(), ["A", "B"]);

        assert_eq!(
            expr.eval(&[("A", 1)]),
            Err(EvalError::UnknownSymbol("B".to_string()))
        );
        assert_eq!(
            SymExpr::var("A").floor_div(0i64.into()).eval(&[("A", 1)]),
            Err(EvalError::DivideByZero)
        );
    }

    #[test]
    fn test_from_usize() {
        assert_eq!(SymExpr::try_from(12usize), Ok(SymExpr::Value(12)));
        assert_eq!(
            SymExpr::try_from(i64::MAX as usize),
            Ok(SymExpr::Value(i64::MAX))
        );
        assert!(SymExpr::try_from(1usize << 63).is_err());
    }
}
