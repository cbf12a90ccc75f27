//! Unification driver.
//!
//! [`PathMerger::unify`] folds a list of fragments into one, pairwise, with
//! union semantics for disjunctions and intersection semantics for
//! conjunctions. Entity pairs go through the set merger; set pairs are
//! combined here. Intersecting two disjunctions distributes into a
//! disjunction of conjunctions which is then minimized.

use tracing::trace;

use super::boolean::{self, Cube};
use super::extract::{extract_fragment, extract_paths};
use super::merger::MergeMode;
use super::{FilterMerge, PathMerger};
use crate::error::{CompileError, Result};
use crate::ir::{Expr, Fragment, PathSet, SetKind};

impl PathMerger<'_> {
    /// Unifies `members` into a single fragment combining them with `mode`.
    ///
    /// Returns `None` when no member carries a path.
    pub fn unify(
        &mut self,
        members: Vec<Fragment>,
        mode: SetKind,
        filters: FilterMerge,
    ) -> Result<Option<Fragment>> {
        self.unify_fragments(members, mode, false, filters)
    }

    /// Unifies the paths of `exprs`, each extracted up to its query root.
    pub fn unify_exprs(
        &mut self,
        exprs: &[&Expr],
        mode: SetKind,
        filters: FilterMerge,
    ) -> Result<Option<Fragment>> {
        let graph = &*self.graph;
        let members: Vec<Fragment> = exprs
            .iter()
            .filter_map(|expr| extract_paths(graph, expr, true))
            .collect();
        self.unify_fragments(members, mode, true, filters)
    }

    pub(crate) fn unify_fragments(
        &mut self,
        members: Vec<Fragment>,
        mode: SetKind,
        reverse: bool,
        filters: FilterMerge,
    ) -> Result<Option<Fragment>> {
        let graph = &*self.graph;
        let paths: Vec<Fragment> = members
            .iter()
            .filter_map(|member| extract_fragment(graph, member, reverse))
            .collect();
        let mut paths = paths.into_iter();
        let Some(mut result) = paths.next() else {
            return Ok(None);
        };

        for path in paths {
            let left = self.graph.resolve(&result);
            let right = self.graph.resolve(&path);
            if left == right {
                result = left;
                continue;
            }
            trace!(depth = self.depth, %mode, %left, %right, "unify step");
            result = match mode {
                SetKind::Disjunction => self.add_paths(left, right, filters)?,
                SetKind::Conjunction => self.intersect_paths(left, right, filters)?,
            };
        }

        match &result {
            Fragment::Node(node) if !self.graph.is_live_node(*node) => Err(
                CompileError::invariant(format!("unification produced absorbed node {node}")),
            ),
            Fragment::Link(link) if !self.graph.is_live_link(*link) => Err(
                CompileError::invariant(format!("unification produced absorbed link {link}")),
            ),
            _ => Ok(Some(self.graph.resolve(&result))),
        }
    }

    /// Union of two resolved fragments.
    fn add_paths(&mut self, left: Fragment, right: Fragment, filters: FilterMerge) -> Result<Fragment> {
        match (left, right) {
            (left @ (Fragment::Node(_) | Fragment::Link(_)), right @ (Fragment::Node(_) | Fragment::Link(_))) => {
                self.add_sets(left, right, filters)
            }
            (path @ (Fragment::Node(_) | Fragment::Link(_)), Fragment::Disjunction(set))
            | (Fragment::Disjunction(set), path @ (Fragment::Node(_) | Fragment::Link(_))) => {
                self.add_to_disjunction(set, path, filters)
            }
            (path @ (Fragment::Node(_) | Fragment::Link(_)), Fragment::Conjunction(set))
            | (Fragment::Conjunction(set), path @ (Fragment::Node(_) | Fragment::Link(_))) => {
                self.add_to_conjunction(set, path, filters)
            }
            (Fragment::Disjunction(left), Fragment::Disjunction(right)) => Ok(
                Fragment::Disjunction(self.add_disjunctions(left, right, filters)?),
            ),
            (Fragment::Disjunction(disjunction), Fragment::Conjunction(conjunction))
            | (Fragment::Conjunction(conjunction), Fragment::Disjunction(disjunction)) => Ok(
                add_conjunction_to_disjunction(disjunction, conjunction),
            ),
            (Fragment::Conjunction(left), Fragment::Conjunction(right)) => {
                Ok(Fragment::Disjunction(add_conjunctions(left, right)))
            }
        }
    }

    fn add_to_disjunction(
        &mut self,
        mut disjunction: PathSet,
        path: Fragment,
        filters: FilterMerge,
    ) -> Result<Fragment> {
        if !self.merge_into_members(&disjunction, &path, MergeMode::Union, filters)? {
            disjunction.insert(path);
        }
        self.graph.resolve_set(&mut disjunction);
        Ok(Fragment::Disjunction(disjunction))
    }

    fn add_to_conjunction(
        &mut self,
        mut conjunction: PathSet,
        path: Fragment,
        filters: FilterMerge,
    ) -> Result<Fragment> {
        if filters.enabled()
            && self.merge_into_members(&conjunction, &path, MergeMode::Union, filters)?
        {
            self.graph.resolve_set(&mut conjunction);
            return Ok(Fragment::Conjunction(conjunction));
        }
        Ok(Fragment::Disjunction(PathSet::from_paths([
            Fragment::Conjunction(conjunction),
            path,
        ])))
    }

    /// Union of two disjunctions, merging matching members.
    pub(crate) fn add_disjunctions(
        &mut self,
        left: PathSet,
        right: PathSet,
        filters: FilterMerge,
    ) -> Result<PathSet> {
        let fixed = left.fixed || right.fixed;
        let mut union = left;
        union.extend(right.into_paths());
        union.fixed = fixed;
        if union.len() > 1 {
            self.unify_fragments(union.paths().to_vec(), SetKind::Disjunction, false, filters)?;
            self.graph.resolve_set(&mut union);
        }
        Ok(union)
    }

    /// Intersection of two resolved fragments.
    fn intersect_paths(
        &mut self,
        left: Fragment,
        right: Fragment,
        filters: FilterMerge,
    ) -> Result<Fragment> {
        match (left, right) {
            (left @ (Fragment::Node(_) | Fragment::Link(_)), right @ (Fragment::Node(_) | Fragment::Link(_))) => {
                self.intersect_sets(left, right, filters)
            }
            (path @ (Fragment::Node(_) | Fragment::Link(_)), Fragment::Disjunction(set))
            | (Fragment::Disjunction(set), path @ (Fragment::Node(_) | Fragment::Link(_))) => Ok(
                Fragment::Conjunction(PathSet::from_paths([Fragment::Disjunction(set), path])),
            ),
            (path @ (Fragment::Node(_) | Fragment::Link(_)), Fragment::Conjunction(set))
            | (Fragment::Conjunction(set), path @ (Fragment::Node(_) | Fragment::Link(_))) => {
                self.intersect_with_conjunction(set, path)
            }
            (Fragment::Disjunction(left), Fragment::Disjunction(right)) => {
                self.intersect_disjunctions(left, right)
            }
            (Fragment::Disjunction(disjunction), Fragment::Conjunction(conjunction))
            | (Fragment::Conjunction(conjunction), Fragment::Disjunction(disjunction)) => Ok(
                intersect_disjunction_with_conjunction(disjunction, conjunction),
            ),
            (Fragment::Conjunction(left), Fragment::Conjunction(right)) => Ok(
                Fragment::Conjunction(self.intersect_conjunctions(left, right, filters)?),
            ),
        }
    }

    fn intersect_with_conjunction(
        &mut self,
        mut conjunction: PathSet,
        path: Fragment,
    ) -> Result<Fragment> {
        if self.merge_into_members(
            &conjunction,
            &path,
            MergeMode::Intersection,
            FilterMerge::Disabled,
        )? {
            self.graph.resolve_set(&mut conjunction);
        } else {
            conjunction.insert(path);
        }
        Ok(Fragment::Conjunction(conjunction))
    }

    /// Intersection of two disjunctions.
    ///
    /// With both sides non-empty the product is distributed into pairwise
    /// intersections and minimized. A lone non-empty side of at most one
    /// member degrades to a conjunction unless it is fixed.
    pub(crate) fn intersect_disjunctions(
        &mut self,
        left: PathSet,
        right: PathSet,
    ) -> Result<Fragment> {
        let fixed = left.fixed || right.fixed;
        if left.is_empty() || right.is_empty() {
            let mut set = if left.is_empty() { right } else { left };
            set.fixed = fixed;
            if set.len() <= 1 && !set.fixed {
                return Ok(Fragment::Conjunction(set));
            }
            return Ok(Fragment::Disjunction(set));
        }

        let mut terms = Vec::with_capacity(left.len() * right.len());
        for a in left.iter() {
            for b in right.iter() {
                let a = self.graph.resolve(a);
                let b = self.graph.resolve(b);
                terms.push(self.intersect_paths(a, b, FilterMerge::Disabled)?);
            }
        }
        let terms: Vec<Fragment> = terms.iter().map(|term| self.graph.resolve(term)).collect();

        let mut set = if self.config.minimize_disjunctions {
            minimize_disjunction(&terms, self.config.factor_common_edges)
        } else {
            PathSet::from_paths(terms)
        };
        set.fixed = fixed;
        Ok(Fragment::Disjunction(set))
    }

    /// Intersection of two conjunctions, merging matching members.
    pub(crate) fn intersect_conjunctions(
        &mut self,
        left: PathSet,
        right: PathSet,
        filters: FilterMerge,
    ) -> Result<PathSet> {
        let mut union = left;
        union.extend(right.into_paths());
        let mut union = flatten(SetKind::Conjunction, union);
        if union.len() > 1 {
            self.unify_fragments(union.paths().to_vec(), SetKind::Conjunction, false, filters)?;
            self.graph.resolve_set(&mut union);
        }
        Ok(union)
    }
}

fn add_conjunction_to_disjunction(disjunction: PathSet, conjunction: PathSet) -> Fragment {
    let mut out = disjunction;
    out.insert(Fragment::Conjunction(conjunction));
    Fragment::Disjunction(out)
}

/// Conjunction sets that end up side by side under a union.
pub(crate) fn add_conjunctions(left: PathSet, right: PathSet) -> PathSet {
    [left, right]
        .into_iter()
        .filter(|set| !set.is_empty())
        .map(Fragment::Conjunction)
        .collect()
}

fn intersect_disjunction_with_conjunction(disjunction: PathSet, conjunction: PathSet) -> Fragment {
    let mut out = PathSet::new();
    if !disjunction.is_empty() {
        out.insert(Fragment::Disjunction(disjunction));
    }
    out.extend(conjunction.into_paths());
    Fragment::Conjunction(out)
}

/// Splices nested sets of the same `kind` into their parent, pre-order.
///
/// Flattening disjunctions carries their `fixed` flag up.
pub fn flatten(kind: SetKind, set: PathSet) -> PathSet {
    let mut out = PathSet::new();
    out.fixed = set.fixed;
    let mut stack: Vec<Fragment> = set.into_paths();
    stack.reverse();
    while let Some(path) = stack.pop() {
        match (kind, path) {
            (SetKind::Conjunction, Fragment::Conjunction(inner)) => {
                stack.extend(inner.into_paths().into_iter().rev());
            }
            (SetKind::Disjunction, Fragment::Disjunction(inner)) => {
                out.fixed |= inner.fixed;
                stack.extend(inner.into_paths().into_iter().rev());
            }
            (_, other) => {
                out.insert(other);
            }
        }
    }
    out
}

/// Minimizes a disjunction of conjunction terms.
///
/// Each distinct member fragment becomes one variable, numbered in order of
/// first appearance. With `factor` set, edges shared by every implicant are
/// pulled out: `{a∧b, a∧c}` becomes `{a ∧ (b ∨ c)}`.
pub fn minimize_disjunction(paths: &[Fragment], factor: bool) -> PathSet {
    let mut variables: Vec<Fragment> = Vec::new();
    let mut products: Vec<Vec<usize>> = Vec::with_capacity(paths.len());
    for path in paths {
        let members: Vec<&Fragment> = match path {
            Fragment::Conjunction(set) => set.iter().collect(),
            other => vec![other],
        };
        let mut ones = Vec::with_capacity(members.len());
        for member in members {
            let idx = match variables.iter().position(|v| v == member) {
                Some(idx) => idx,
                None => {
                    variables.push(member.clone());
                    variables.len() - 1
                }
            };
            ones.push(idx);
        }
        products.push(ones);
    }

    let width = variables.len();
    let terms: Vec<Cube> = products
        .iter()
        .map(|ones| Cube::from_ones(width, ones.iter().copied()))
        .collect();
    let implicants: Vec<Vec<usize>> = boolean::minimize(&terms)
        .iter()
        .map(|cube| cube.ones().collect())
        .collect();

    if factor {
        if let Some(factored) = factor_common(&variables, &implicants) {
            return factored;
        }
    }
    implicants
        .iter()
        .map(|ones| product(&variables, ones))
        .collect()
}

fn product(variables: &[Fragment], ones: &[usize]) -> Fragment {
    match ones {
        [single] => variables[*single].clone(),
        _ => Fragment::Conjunction(ones.iter().map(|idx| variables[*idx].clone()).collect()),
    }
}

fn factor_common(variables: &[Fragment], implicants: &[Vec<usize>]) -> Option<PathSet> {
    let (first, rest) = implicants.split_first()?;
    if rest.is_empty() {
        return None;
    }
    let common: Vec<usize> = first
        .iter()
        .copied()
        .filter(|idx| rest.iter().all(|ones| ones.contains(idx)))
        .collect();
    if common.is_empty() {
        return None;
    }
    let residuals: Vec<Vec<usize>> = implicants
        .iter()
        .map(|ones| ones.iter().copied().filter(|idx| !common.contains(idx)).collect())
        .collect();
    if residuals.iter().any(Vec::is_empty) {
        return None;
    }

    let mut factored: PathSet = common.iter().map(|idx| variables[*idx].clone()).collect();
    factored.insert(Fragment::Disjunction(
        residuals.iter().map(|ones| product(variables, ones)).collect(),
    ));
    Some(PathSet::from_paths([Fragment::Conjunction(factored)]))
}
