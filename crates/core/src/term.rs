use std::{fmt, rc::Rc};

use crate::{Error, Vector};

/// A host expression that can be assembled into a [`Vector`] on demand.
///
/// This is the seam for symbolic forms: the host keeps its own expression
/// representation and only materializes it when the tape needs numbers.
pub trait Assemble: fmt::Debug {
    /// Assembles the expression.
    ///
    /// # Errors
    ///
    /// Returns an error if assembly fails.
    fn assemble(&self) -> Result<Vector, Error>;
}

/// A lazy linear combination of host expressions.
#[derive(Debug, Clone)]
pub struct Form {
    terms: Vec<(f64, Rc<dyn Assemble>)>,
}

impl Form {
    /// Wraps a single expression.
    pub fn new(expr: impl Assemble + 'static) -> Self {
        Self::from_rc(Rc::new(expr))
    }

    pub fn from_rc(expr: Rc<dyn Assemble>) -> Self {
        Self {
            terms: vec![(1.0, expr)],
        }
    }

    #[must_use]
    pub fn scaled(mut self, alpha: f64) -> Self {
        for (coefficient, _) in &mut self.terms {
            *coefficient *= alpha;
        }
        self
    }

    /// Returns `self + alpha * other` without assembling either side.
    #[must_use]
    pub fn add_scaled(mut self, alpha: f64, other: Form) -> Self {
        self.terms
            .extend(other.terms.into_iter().map(|(c, expr)| (alpha * c, expr)));
        self
    }

    /// Assembles every term and sums them.
    ///
    /// # Errors
    ///
    /// Returns an error if any term fails to assemble or the lengths differ.
    pub fn assemble(&self) -> Result<Vector, Error> {
        let mut terms = self.terms.iter();
        let Some((c, first)) = terms.next() else {
            return Err(Error::invalid_inputs("cannot assemble an empty form"));
        };
        let mut total = first.assemble()?.scaled(*c);
        for (c, expr) in terms {
            total.axpy(*c, &expr.assemble()?)?;
        }
        Ok(total)
    }
}

/// A right-hand-side or source value as the tape passes it around.
///
/// Combining two terms is defined per pair of variants: forms stay lazy when
/// added to forms, vectors add in place, and a form meeting a vector is
/// assembled first. [`Term::Zero`] records a value proven to be zero, which
/// lets replay skip work that could only contribute nothing.
#[derive(Debug, Clone)]
pub enum Term {
    Zero(usize),
    Form(Form),
    Vector(Vector),
}

impl Term {
    #[must_use]
    pub fn zero(len: usize) -> Self {
        Self::Zero(len)
    }

    /// Returns `true` only for a value proven zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        matches!(self, Self::Zero(_))
    }

    #[must_use]
    pub fn scaled(self, alpha: f64) -> Self {
        match self {
            Self::Zero(len) => Self::Zero(len),
            Self::Form(form) => Self::Form(form.scaled(alpha)),
            Self::Vector(v) => Self::Vector(v.scaled(alpha)),
        }
    }

    /// Returns `self + alpha * other`.
    ///
    /// # Errors
    ///
    /// Returns an error if a form fails to assemble or the lengths differ.
    pub fn axpy(self, alpha: f64, other: Term) -> Result<Term, Error> {
        match (self, other) {
            (Self::Zero(a), Self::Zero(b)) => {
                if a != b {
                    return Err(Error::invalid_inputs(format!(
                        "cannot combine zero terms of length {a} and {b}"
                    )));
                }
                Ok(Self::Zero(a))
            }
            (Self::Zero(len), other) => {
                let scaled = other.scaled(alpha);
                if let Self::Vector(v) = &scaled
                    && v.len() != len
                {
                    return Err(Error::invalid_inputs(format!(
                        "cannot combine terms of length {len} and {}",
                        v.len()
                    )));
                }
                Ok(scaled)
            }
            (this, Self::Zero(_)) => Ok(this),
            (Self::Form(f), Self::Form(g)) => Ok(Self::Form(f.add_scaled(alpha, g))),
            (Self::Vector(mut v), Self::Vector(w)) => {
                v.axpy(alpha, &w)?;
                Ok(Self::Vector(v))
            }
            (Self::Vector(mut v), Self::Form(g)) => {
                v.axpy(alpha, &g.assemble()?)?;
                Ok(Self::Vector(v))
            }
            (Self::Form(f), Self::Vector(w)) => {
                let mut v = f.assemble()?;
                v.axpy(alpha, &w)?;
                Ok(Self::Vector(v))
            }
        }
    }

    /// Converts the term into a vector, assembling forms.
    ///
    /// # Errors
    ///
    /// Returns an error if a form fails to assemble.
    pub fn materialize(self) -> Result<Vector, Error> {
        match self {
            Self::Zero(len) => Ok(Vector::zeros(len)),
            Self::Form(form) => form.assemble(),
            Self::Vector(v) => Ok(v),
        }
    }
}

impl From<Vector> for Term {
    fn from(v: Vector) -> Self {
        Self::Vector(v)
    }
}

impl From<Form> for Term {
    fn from(form: Form) -> Self {
        Self::Form(form)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::Cell;

    use approx::assert_relative_eq;

    /// Expression that counts how often it is assembled.
    #[derive(Debug)]
    struct Counted {
        value: Vec<f64>,
        calls: Rc<Cell<usize>>,
    }

    impl Assemble for Counted {
        fn assemble(&self) -> Result<Vector, Error> {
            self.calls.set(self.calls.get() + 1);
            Ok(Vector::from(self.value.clone()))
        }
    }

    fn counted(value: Vec<f64>) -> (Form, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        let form = Form::new(Counted {
            value,
            calls: Rc::clone(&calls),
        });
        (form, calls)
    }

    #[test]
    fn forms_stay_lazy_when_combined() {
        let (f, f_calls) = counted(vec![1.0, 2.0]);
        let (g, g_calls) = counted(vec![10.0, 20.0]);

        let sum = Term::from(f).axpy(0.5, Term::from(g)).unwrap();
        assert!(matches!(sum, Term::Form(_)));
        assert_eq!(f_calls.get() + g_calls.get(), 0);

        let v = sum.materialize().unwrap();
        assert_eq!(v.to_vec(), vec![6.0, 12.0]);
        assert_eq!(f_calls.get(), 1);
        assert_eq!(g_calls.get(), 1);
    }

    #[test]
    fn form_meeting_vector_is_assembled() {
        let (f, _) = counted(vec![1.0, 1.0]);
        let v = Term::from(Vector::from(vec![2.0, 3.0]));

        let sum = v.axpy(-1.0, Term::from(f)).unwrap();
        let Term::Vector(sum) = sum else {
            panic!("expected a vector");
        };
        assert_eq!(sum.to_vec(), vec![1.0, 2.0]);
    }

    #[test]
    fn zero_is_the_identity_for_addition() {
        let v = Term::from(Vector::from(vec![1.0, 2.0]));
        let left = Term::zero(2).axpy(3.0, v.clone()).unwrap().materialize().unwrap();
        let right = v.axpy(3.0, Term::zero(2)).unwrap().materialize().unwrap();

        assert_relative_eq!(left[1], 6.0);
        assert_relative_eq!(right[1], 2.0);
    }

    #[test]
    fn zero_length_mismatch_is_rejected() {
        let v = Term::from(Vector::from(vec![1.0, 2.0]));
        assert!(Term::zero(3).axpy(1.0, v).is_err());
        assert!(Term::zero(3).axpy(1.0, Term::zero(2)).is_err());
    }

    #[test]
    fn zero_materializes_to_zeros() {
        let v = Term::zero(3).materialize().unwrap();
        assert!(v.is_zero());
        assert_eq!(v.len(), 3);
    }
}
