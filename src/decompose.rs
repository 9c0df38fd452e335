//! Decomposition of a multi-term design into nested (reduced, full) design
//! pairs, one per term, according to a sums-of-squares convention.

use crate::{
    design::{independent_columns, DesignMatrix, Term, INTERCEPT},
    error::{RrppError, RrppResult, RrppWarning},
    fit::{projector::Projector, transform::CovarianceTransform},
    utility::col_sum_sq,
};
use itertools::Itertools;
use ndarray::{Array2, Axis};
use std::{fmt, str::FromStr};

/// How the null model of each term is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SsType {
    /// Type I: each term is added to the terms before it. Order matters.
    Sequential,
    /// Type II: each term is added to every term that does not contain it.
    Hierarchical,
    /// Type III: each term is dropped from the complete model.
    Marginal,
}

impl Default for SsType {
    fn default() -> Self {
        Self::Sequential
    }
}

impl FromStr for SsType {
    type Err = RrppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "i" | "1" | "sequential" => Ok(Self::Sequential),
            "ii" | "2" | "hierarchical" => Ok(Self::Hierarchical),
            "iii" | "3" | "marginal" => Ok(Self::Marginal),
            _ => Err(RrppError::BadInput(format!("unknown SS type '{}'", s))),
        }
    }
}

impl fmt::Display for SsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Sequential => "I",
            Self::Hierarchical => "II",
            Self::Marginal => "III",
        };
        write!(f, "{}", label)
    }
}

/// The null (reduced) and alternative (full) designs for testing one term.
#[derive(Debug, Clone)]
pub struct NestedModelPair {
    term: String,
    reduced: DesignMatrix,
    full: DesignMatrix,
}

impl NestedModelPair {
    /// Pair two designs directly. The reduced design's column space must
    /// lie within the full one's, which [`Decomposition::from_pairs`]
    /// verifies. Columns are matched between the two by their term
    /// assignment.
    pub fn new<S: Into<String>>(
        term: S,
        reduced: DesignMatrix,
        full: DesignMatrix,
    ) -> RrppResult<Self> {
        if reduced.nrows() != full.nrows() {
            return Err(RrppError::Design(
                "reduced and full designs must have the same rows".to_string(),
            ));
        }
        Ok(Self {
            term: term.into(),
            reduced,
            full,
        })
    }

    pub fn term(&self) -> &str {
        &self.term
    }

    pub fn reduced(&self) -> &DesignMatrix {
        &self.reduced
    }

    pub fn full(&self) -> &DesignMatrix {
        &self.full
    }

    /// Positions of the full design's columns whose owning term is absent
    /// from the reduced design.
    pub fn added_columns(&self) -> Vec<usize> {
        let reduced_owners = self.reduced.assign().iter().copied().unique().collect_vec();
        self.full
            .assign()
            .iter()
            .positions(|a| !reduced_owners.contains(a))
            .collect()
    }
}

/// The nested pairs of every term, along with the complete and null designs
/// that share the same rank screen.
#[derive(Debug, Clone)]
pub struct Decomposition {
    /// `None` when the pairs were supplied directly.
    pub ss_type: Option<SsType>,
    pub pairs: Vec<NestedModelPair>,
    /// The complete model after aliased columns are dropped.
    pub complete: DesignMatrix,
    /// The intercept-only model, or a design without columns when the model
    /// has no intercept.
    pub null: DesignMatrix,
    /// Columns of the supplied design that were kept.
    pub kept_columns: Vec<usize>,
    pub warnings: Vec<RrppWarning>,
}

/// `result[[i, j]]` is true when term `j` contains every factor of term `i`.
pub fn containment_matrix(terms: &[Term]) -> Array2<bool> {
    let k = terms.len();
    Array2::from_shape_fn((k, k), |(i, j)| terms[j].contains(&terms[i]))
}

/// For every term, the indices of the terms in its reduced model.
fn reduced_term_sets(terms: &[Term], ss_type: SsType) -> Vec<Vec<usize>> {
    let k = terms.len();
    match ss_type {
        SsType::Sequential => (0..k).map(|i| (0..i).collect()).collect(),
        SsType::Hierarchical => {
            let contains = containment_matrix(terms);
            (0..k)
                .map(|i| (0..k).filter(|&j| j != i && !contains[[i, j]]).collect())
                .collect()
        }
        SsType::Marginal => (0..k)
            .map(|i| (0..k).filter(|&j| j != i).collect())
            .collect(),
    }
}

impl Decomposition {
    /// Test caller-built nested pairs. The complete and null models still
    /// come from the rank-screened `design`.
    pub fn from_pairs(
        design: &DesignMatrix,
        pairs: Vec<NestedModelPair>,
        rank_tol: f64,
    ) -> RrppResult<Self> {
        Self::from_pairs_transformed(design, pairs, rank_tol, &CovarianceTransform::Identity)
    }

    /// Like [`Decomposition::from_pairs`], with the rank screen of the
    /// complete model run on the transformed design.
    pub fn from_pairs_transformed(
        design: &DesignMatrix,
        pairs: Vec<NestedModelPair>,
        rank_tol: f64,
        transform: &CovarianceTransform,
    ) -> RrppResult<Self> {
        if pairs.is_empty() {
            return Err(RrppError::Design("no nested pairs were supplied".to_string()));
        }
        if let Some(pair) = pairs.iter().find(|p| p.full().nrows() != design.nrows()) {
            return Err(RrppError::BadInput(format!(
                "pair '{}' has {} rows but the design has {}",
                pair.term(),
                pair.full().nrows(),
                design.nrows()
            )));
        }
        if let Some(name) = pairs.iter().map(NestedModelPair::term).duplicates().next() {
            return Err(RrppError::Design(format!("term '{}' is paired twice", name)));
        }
        for pair in &pairs {
            check_nested(pair, rank_tol)?;
        }
        let (kept, warnings) = screen(design, rank_tol, transform)?;
        let complete = design.select(&kept);
        let intercept = kept
            .iter()
            .copied()
            .filter(|&c| design.assign()[c].is_none())
            .collect_vec();
        let null = design.select(&intercept);
        log::info!(
            "Using {} supplied nested pair(s) (complete model rank {})",
            pairs.len(),
            complete.ncols()
        );
        Ok(Self {
            ss_type: None,
            pairs,
            complete,
            null,
            kept_columns: kept,
            warnings,
        })
    }

    pub fn terms(&self) -> Vec<&str> {
        self.pairs.iter().map(NestedModelPair::term).collect()
    }
}

/// Check that the reduced design of a pair spans no direction outside its
/// full design.
fn check_nested(pair: &NestedModelPair, rank_tol: f64) -> RrppResult<()> {
    let reduced = pair.reduced().x();
    if reduced.ncols() == 0 {
        return Ok(());
    }
    let full = pair.full().x();
    let full_kept = independent_columns(full, rank_tol)?;
    let reduced_rank = independent_columns(reduced, rank_tol)?.len();
    if reduced_rank > full_kept.len() {
        return Err(RrppError::Design(format!(
            "pair '{}': reduced model has rank {} but the full model only {}",
            pair.term(),
            reduced_rank,
            full_kept.len()
        )));
    }
    let projector = Projector::new(full.select(Axis(1), &full_kept).view())?;
    let outside = col_sum_sq(projector.residuals(reduced).view());
    let norms = col_sum_sq(reduced);
    // floor for a zero rank tolerance
    let tol = rank_tol.max(f64::EPSILON.sqrt());
    if let Some(col) = (0..reduced.ncols()).find(|&j| outside[j].sqrt() > tol * norms[j].sqrt()) {
        return Err(RrppError::Design(format!(
            "pair '{}' is not nested: reduced column {} ({}) is outside the full model",
            pair.term(),
            col,
            pair.reduced().column_owner(col)
        )));
    }
    Ok(())
}

/// Run the rank screen shared by every nested design on the transformed
/// design, and check that each term keeps a column and that residual degrees
/// of freedom remain.
fn screen(
    design: &DesignMatrix,
    rank_tol: f64,
    transform: &CovarianceTransform,
) -> RrppResult<(Vec<usize>, Vec<RrppWarning>)> {
    let kept = independent_columns(transform.apply(design.x()).view(), rank_tol)?;
    if kept.is_empty() {
        return Err(RrppError::RankDeficiency {
            model: "complete model".to_string(),
        });
    }

    let mut warnings = Vec::new();
    let dropped = (0..design.ncols()).filter(|c| !kept.contains(c)).collect_vec();
    if !dropped.is_empty() {
        let affected = dropped
            .iter()
            .map(|&c| design.column_owner(c).to_string())
            .unique()
            .collect_vec();
        let warning = RrppWarning::RankTruncated {
            dropped_columns: dropped,
            terms: affected,
        };
        log::warn!("{}", warning);
        warnings.push(warning);
    }

    for (i_term, term) in design.terms().iter().enumerate() {
        if !kept.iter().any(|&c| design.assign()[c] == Some(i_term)) {
            return Err(RrppError::Design(format!(
                "term '{}' has no columns left after removing aliased columns",
                term.name()
            )));
        }
    }
    let n_obs = design.nrows();
    if n_obs <= kept.len() {
        return Err(RrppError::Design(format!(
            "{} observations leave no residual degrees of freedom for rank {}",
            n_obs,
            kept.len()
        )));
    }
    Ok((kept, warnings))
}

/// Screen the design for aliased columns once and build the nested pair of
/// every term from the surviving columns, so that every reduced design is a
/// column subset of its full design.
pub fn decompose(
    design: &DesignMatrix,
    ss_type: SsType,
    rank_tol: f64,
) -> RrppResult<Decomposition> {
    decompose_transformed(design, ss_type, rank_tol, &CovarianceTransform::Identity)
}

/// Like [`decompose`], with the rank screen run on the design premultiplied
/// by the covariance transform the models will be fit with.
pub fn decompose_transformed(
    design: &DesignMatrix,
    ss_type: SsType,
    rank_tol: f64,
    transform: &CovarianceTransform,
) -> RrppResult<Decomposition> {
    let terms = design.terms();
    if terms.is_empty() {
        return Err(RrppError::Design("the model has no terms to test".to_string()));
    }
    let (kept, warnings) = screen(design, rank_tol, transform)?;

    // kept columns owned by the intercept or one of the listed terms
    let columns_for = |set: &[usize]| -> Vec<usize> {
        kept.iter()
            .copied()
            .filter(|&c| match design.assign()[c] {
                None => true,
                Some(t) => set.contains(&t),
            })
            .collect()
    };

    let pairs = reduced_term_sets(terms, ss_type)
        .into_iter()
        .enumerate()
        .map(|(i_term, reduced_set)| {
            let mut full_set = reduced_set.clone();
            full_set.push(i_term);
            let reduced = design.select(&columns_for(&reduced_set));
            let full = design.select(&columns_for(&full_set));
            log::debug!(
                "Term '{}': reduced model has {} columns ({}), full model has {}",
                terms[i_term].name(),
                reduced.ncols(),
                reduced_set.iter().map(|&t| terms[t].name()).join(" + "),
                full.ncols()
            );
            NestedModelPair::new(terms[i_term].name(), reduced, full)
        })
        .collect::<RrppResult<Vec<_>>>()?;

    let all_terms = (0..terms.len()).collect_vec();
    let complete = design.select(&columns_for(&all_terms));
    let null = design.select(&columns_for(&[]));
    log::info!(
        "Decomposed {} terms with SS type {} (rank {} of {} columns, {} for the null model)",
        terms.len(),
        ss_type,
        complete.ncols(),
        design.ncols(),
        if null.ncols() > 0 { INTERCEPT } else { "no columns" }
    );

    Ok(Decomposition {
        ss_type: Some(ss_type),
        pairs,
        complete,
        null,
        kept_columns: kept,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_factor_design() -> RrppResult<DesignMatrix> {
        let a = array![[0.], [1.], [0.], [1.], [0.], [1.], [0.], [1.]];
        let b = array![[0.], [0.], [1.], [1.], [0.], [0.], [1.], [1.]];
        let ab = &a * &b;
        DesignMatrix::from_blocks(
            true,
            vec![
                (Term::new("A"), a),
                (Term::new("B"), b),
                (Term::new("A:B"), ab),
            ],
        )
    }

    #[test]
    fn containment_of_interaction() {
        let terms = vec![Term::new("A"), Term::new("B"), Term::new("A:B")];
        let c = containment_matrix(&terms);
        assert!(c[[0, 2]] && c[[1, 2]]);
        assert!(!c[[2, 0]] && !c[[0, 1]]);
        assert!(c[[0, 0]]);
    }

    #[test]
    fn sequential_chain() -> RrppResult<()> {
        let d = decompose(&two_factor_design()?, SsType::Sequential, 1e-7)?;
        for w in d.pairs.windows(2) {
            assert_eq!(w[0].full(), w[1].reduced());
        }
        assert_eq!(d.pairs[0].reduced().ncols(), 1);
        assert_eq!(d.pairs[2].full(), &d.complete);
        Ok(())
    }

    #[test]
    fn hierarchical_sets() -> RrppResult<()> {
        let terms = vec![Term::new("A"), Term::new("B"), Term::new("A:B")];
        let sets = reduced_term_sets(&terms, SsType::Hierarchical);
        assert_eq!(sets, vec![vec![1], vec![0], vec![0, 1]]);
        let d = decompose(&two_factor_design()?, SsType::Hierarchical, 1e-7)?;
        // A is tested against intercept + B
        assert_eq!(d.pairs[0].reduced().assign(), &[None, Some(1)]);
        assert_eq!(d.pairs[0].added_columns(), vec![1]);
        Ok(())
    }

    #[test]
    fn marginal_drops_one_term() -> RrppResult<()> {
        let d = decompose(&two_factor_design()?, SsType::Marginal, 1e-7)?;
        for pair in &d.pairs {
            assert_eq!(pair.full(), &d.complete);
            assert_eq!(pair.reduced().ncols() + 1, pair.full().ncols());
        }
        Ok(())
    }

    #[test]
    fn aliased_term_is_a_design_error() -> RrppResult<()> {
        let a = array![[0.], [1.], [0.], [1.], [1.]];
        let design = DesignMatrix::from_blocks(
            true,
            vec![(Term::new("A"), a.clone()), (Term::new("A2"), a * 2.)],
        )?;
        assert!(matches!(
            decompose(&design, SsType::Sequential, 1e-7),
            Err(RrppError::Design(_))
        ));
        Ok(())
    }

    #[test]
    fn supplied_pairs() -> RrppResult<()> {
        let design = two_factor_design()?;
        let a_only = design.select(&[0, 1]);
        let pairs = vec![
            NestedModelPair::new("A", design.select(&[0]), a_only.clone())?,
            NestedModelPair::new("nothing", a_only.clone(), a_only)?,
        ];
        let d = Decomposition::from_pairs(&design, pairs.clone(), 1e-7)?;
        assert_eq!(d.ss_type, None);
        assert_eq!(d.terms(), vec!["A", "nothing"]);
        assert_eq!(d.complete.ncols(), 4);
        assert_eq!(d.null.ncols(), 1);
        let twice = vec![pairs[0].clone(), pairs[0].clone()];
        assert!(Decomposition::from_pairs(&design, twice, 1e-7).is_err());
        Ok(())
    }

    #[test]
    fn ss_type_parsing() -> RrppResult<()> {
        assert_eq!("II".parse::<SsType>()?, SsType::Hierarchical);
        assert_eq!("marginal".parse::<SsType>()?, SsType::Marginal);
        assert!("IV".parse::<SsType>().is_err());
        Ok(())
    }
}
