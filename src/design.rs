//! Design matrices whose columns are grouped into named model terms.

use crate::{
    error::{RrppError, RrppResult},
    utility::{col_sum_sq, one_pad},
};
use itertools::Itertools;
use ndarray::{concatenate, Array2, ArrayView2, Axis};
use ndarray_linalg::QR;

/// Name reported for columns that belong to no term.
pub const INTERCEPT: &str = "(Intercept)";

/// A model term, identified by name and by the set of factors (variables) it
/// is built from. Interaction terms carry several factors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    name: String,
    factors: Vec<String>,
}

impl Term {
    /// Create a term whose factors are the `:`-separated parts of its name,
    /// so that `"A:B"` is the interaction of `A` and `B`.
    pub fn new<S: Into<String>>(name: S) -> Self {
        let name = name.into();
        let factors = name
            .split(':')
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .sorted()
            .dedup()
            .collect();
        Self { name, factors }
    }

    /// Create a term with an explicit factor set.
    pub fn with_factors<S, I, T>(name: S, factors: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let factors = factors
            .into_iter()
            .map(Into::into)
            .sorted()
            .dedup()
            .collect();
        Self {
            name: name.into(),
            factors,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn factors(&self) -> &[String] {
        &self.factors
    }

    /// The number of factors, i.e. 1 for main effects and 2 for two-way
    /// interactions.
    pub fn order(&self) -> usize {
        self.factors.len()
    }

    /// Whether every factor of `other` is also a factor of this term, i.e.
    /// `other` is marginal to (or the same as) `self`.
    pub fn contains(&self, other: &Term) -> bool {
        other.factors.iter().all(|f| self.factors.contains(f))
    }
}

/// Holds a numeric design matrix with observations in rows, along with the
/// term owning each column. Columns assigned `None` form the intercept.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignMatrix {
    x: Array2<f64>,
    assign: Vec<Option<usize>>,
    terms: Vec<Term>,
}

impl DesignMatrix {
    pub fn new(x: Array2<f64>, assign: Vec<Option<usize>>, terms: Vec<Term>) -> RrppResult<Self> {
        if assign.len() != x.ncols() {
            return Err(RrppError::BadInput(format!(
                "{} column assignments given for {} columns",
                assign.len(),
                x.ncols()
            )));
        }
        if let Some(bad) = assign.iter().flatten().find(|&&t| t >= terms.len()) {
            return Err(RrppError::BadInput(format!(
                "column assigned to term {} but only {} terms exist",
                bad,
                terms.len()
            )));
        }
        let names = terms.iter().map(Term::name).collect::<Vec<_>>();
        if names.iter().duplicates().next().is_some() {
            return Err(RrppError::Design("term names must be unique".to_string()));
        }
        Ok(Self { x, assign, terms })
    }

    /// Assemble a design from per-term column blocks in model order,
    /// optionally prefixed with a column of ones.
    pub fn from_blocks(intercept: bool, blocks: Vec<(Term, Array2<f64>)>) -> RrppResult<Self> {
        let n_rows = match blocks.first() {
            Some((_, block)) => block.nrows(),
            None => {
                return Err(RrppError::BadInput(
                    "a design needs at least one term".to_string(),
                ))
            }
        };
        if blocks.iter().any(|(_, b)| b.nrows() != n_rows) {
            return Err(RrppError::BadInput(
                "all term blocks must have the same number of rows".to_string(),
            ));
        }
        let mut assign: Vec<Option<usize>> = Vec::new();
        if intercept {
            assign.push(None);
        }
        for (i_term, (_, block)) in blocks.iter().enumerate() {
            assign.extend(std::iter::repeat(Some(i_term)).take(block.ncols()));
        }
        let views: Vec<ArrayView2<f64>> = blocks.iter().map(|(_, b)| b.view()).collect();
        let x = concatenate(Axis(1), &views).map_err(|e| RrppError::BadInput(e.to_string()))?;
        let x = if intercept { one_pad(x.view()) } else { x };
        let terms = blocks.into_iter().map(|(t, _)| t).collect();
        Self::new(x, assign, terms)
    }

    pub fn x(&self) -> ArrayView2<f64> {
        self.x.view()
    }

    pub fn nrows(&self) -> usize {
        self.x.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.x.ncols()
    }

    pub fn assign(&self) -> &[Option<usize>] {
        &self.assign
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn has_intercept(&self) -> bool {
        self.assign.iter().any(Option::is_none)
    }

    /// The name of the term owning a column.
    pub fn column_owner(&self, col: usize) -> &str {
        match self.assign[col] {
            Some(t) => self.terms[t].name(),
            None => INTERCEPT,
        }
    }

    /// Positions of the columns belonging to a term.
    pub fn columns_of(&self, term: usize) -> Vec<usize> {
        self.assign.iter().positions(|&a| a == Some(term)).collect()
    }

    /// A design made of a subset of columns. Term labels are kept so column
    /// assignments stay comparable between nested designs.
    pub fn select(&self, cols: &[usize]) -> Self {
        Self {
            x: self.x.select(Axis(1), cols),
            assign: cols.iter().map(|&c| self.assign[c]).collect(),
            terms: self.terms.clone(),
        }
    }

    /// The indices of the columns that are linearly independent of the
    /// columns before them. See [`independent_columns`].
    pub fn independent_columns(&self, tol: f64) -> RrppResult<Vec<usize>> {
        independent_columns(self.x.view(), tol)
    }
}

/// Returns the columns of `x` that survive a left-to-right rank screen. A
/// column is dropped when the norm of its component orthogonal to the kept
/// columns is below `tol` times its own norm, which matches the aliasing a
/// pivoted QR decomposition would report for the same column order.
pub fn independent_columns(x: ArrayView2<f64>, tol: f64) -> RrppResult<Vec<usize>> {
    let (n_rows, n_cols) = x.dim();
    if n_rows == 0 || n_cols == 0 {
        return Ok(Vec::new());
    }
    let norms = col_sum_sq(x).mapv_into(f64::sqrt);

    // Fast path: a single decomposition settles the common full-rank case.
    if n_cols <= n_rows && norms.iter().all(|&nm| nm > 0.) {
        let (_, r) = x.qr()?;
        if (0..n_cols).all(|j| r[[j, j]].abs() > tol * norms[j]) {
            return Ok((0..n_cols).collect());
        }
    }

    let mut kept: Vec<usize> = Vec::new();
    for j in 0..n_cols {
        if kept.len() == n_rows {
            break;
        }
        if !(norms[j] > 0.) {
            continue;
        }
        let mut candidate = kept.clone();
        candidate.push(j);
        let (_, r) = x.select(Axis(1), &candidate).qr()?;
        let last = candidate.len() - 1;
        if r[[last, last]].abs() > tol * norms[j] {
            kept.push(j);
        }
    }
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn interaction_factors() {
        let ab = Term::new("B:A");
        assert_eq!(ab.factors(), &["A".to_string(), "B".to_string()]);
        assert_eq!(ab.order(), 2);
        assert!(ab.contains(&Term::new("A")));
        assert!(!Term::new("A").contains(&ab));
    }

    #[test]
    fn aliased_columns_are_dropped() -> RrppResult<()> {
        // third column is the sum of the first two, last is independent
        let x = array![
            [1., 0., 1., 0.5],
            [1., 1., 2., 0.1],
            [1., 0., 1., -0.3],
            [1., 1., 2., 0.9],
            [1., 0., 1., 0.2],
        ];
        assert_eq!(independent_columns(x.view(), 1e-7)?, vec![0, 1, 3]);
        Ok(())
    }

    #[test]
    fn zero_column_is_dropped() -> RrppResult<()> {
        let x = array![[1., 0.], [1., 0.], [1., 0.]];
        assert_eq!(independent_columns(x.view(), 1e-7)?, vec![0]);
        Ok(())
    }

    #[test]
    fn blocks_assign_columns() -> RrppResult<()> {
        let a = array![[0.], [1.], [0.], [1.]];
        let b = array![[0.1, 1.], [0.2, 0.], [0.3, 1.], [0.4, 0.]];
        let d = DesignMatrix::from_blocks(true, vec![(Term::new("A"), a), (Term::new("B"), b)])?;
        assert_eq!(d.ncols(), 4);
        assert_eq!(d.assign(), &[None, Some(0), Some(1), Some(1)]);
        assert!(d.has_intercept());
        assert_eq!(d.columns_of(1), vec![2, 3]);
        assert_eq!(d.column_owner(0), INTERCEPT);
        Ok(())
    }
}
