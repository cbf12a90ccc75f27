//! Two-level boolean minimization.
//!
//! Terms are cubes over a fixed number of variables. [`minimize`] returns a
//! minimal sum-of-products cover of the input terms: prime implicants are
//! generated Quine–McCluskey style, essential primes are taken first and the
//! remaining terms are covered by the smallest set found with Petrick's
//! method. Ties between equally small covers go to the lexicographically
//! smallest set of prime indices, so results are deterministic.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use smallvec::SmallVec;

/// Value of one variable inside a [`Cube`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Bit {
    /// Variable must be false.
    Zero,
    /// Variable must be true.
    One,
    /// Variable is unconstrained.
    DontCare,
}

/// Partial assignment of boolean variables.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Cube {
    bits: SmallVec<[Bit; 16]>,
}

impl Cube {
    /// Fully specified term from booleans, variable 0 first.
    pub fn from_bits(bits: impl IntoIterator<Item = bool>) -> Self {
        Self {
            bits: bits
                .into_iter()
                .map(|bit| if bit { Bit::One } else { Bit::Zero })
                .collect(),
        }
    }

    /// Fully specified term of `width` variables with the given ones.
    pub fn from_ones(width: usize, ones: impl IntoIterator<Item = usize>) -> Self {
        let mut bits: SmallVec<[Bit; 16]> = SmallVec::from_elem(Bit::Zero, width);
        for idx in ones {
            if let Some(bit) = bits.get_mut(idx) {
                *bit = Bit::One;
            }
        }
        Self { bits }
    }

    /// Number of variables.
    pub fn width(&self) -> usize {
        self.bits.len()
    }

    /// Variable assignments, variable 0 first.
    pub fn bits(&self) -> &[Bit] {
        &self.bits
    }

    /// Indices of variables that must be true.
    pub fn ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, bit)| **bit == Bit::One)
            .map(|(idx, _)| idx)
    }

    fn count_ones(&self) -> usize {
        self.ones().count()
    }

    /// Merges two cubes that differ in exactly one specified variable.
    fn combine(&self, other: &Cube) -> Option<Cube> {
        if self.width() != other.width() {
            return None;
        }
        let mut diff = None;
        for (idx, (a, b)) in self.bits.iter().zip(other.bits.iter()).enumerate() {
            if a == b {
                continue;
            }
            if *a == Bit::DontCare || *b == Bit::DontCare || diff.is_some() {
                return None;
            }
            diff = Some(idx);
        }
        let idx = diff?;
        let mut merged = self.clone();
        merged.bits[idx] = Bit::DontCare;
        Some(merged)
    }

    /// Returns `true` if every assignment matching `term` matches `self`.
    pub fn covers(&self, term: &Cube) -> bool {
        self.width() == term.width()
            && self
                .bits
                .iter()
                .zip(term.bits.iter())
                .all(|(ours, theirs)| *ours == Bit::DontCare || ours == theirs)
    }

    /// Fully specified terms covered by the cube.
    ///
    /// Exponential in the number of don't-care positions.
    pub fn expand(&self) -> Vec<Cube> {
        let mut out = vec![Cube {
            bits: SmallVec::new(),
        }];
        for bit in &self.bits {
            let choices: &[Bit] = match bit {
                Bit::DontCare => &[Bit::Zero, Bit::One],
                Bit::Zero => &[Bit::Zero],
                Bit::One => &[Bit::One],
            };
            out = out
                .into_iter()
                .flat_map(|prefix| {
                    choices.iter().map(move |choice| {
                        let mut next = prefix.clone();
                        next.bits.push(*choice);
                        next
                    })
                })
                .collect();
        }
        out
    }
}

impl fmt::Display for Cube {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for bit in &self.bits {
            f.write_str(match bit {
                Bit::Zero => "0",
                Bit::One => "1",
                Bit::DontCare => "-",
            })?;
        }
        Ok(())
    }
}

fn dedup(cubes: &[Cube]) -> Vec<Cube> {
    let mut out: Vec<Cube> = Vec::with_capacity(cubes.len());
    for cube in cubes {
        if !out.contains(cube) {
            out.push(cube.clone());
        }
    }
    out
}

/// Generates every prime implicant of `terms`, in generation order.
pub fn prime_implicants(terms: &[Cube]) -> Vec<Cube> {
    let mut current = dedup(terms);
    let mut primes: Vec<Cube> = Vec::new();

    while !current.is_empty() {
        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (idx, cube) in current.iter().enumerate() {
            groups.entry(cube.count_ones()).or_default().push(idx);
        }

        let mut used = vec![false; current.len()];
        let mut next: Vec<Cube> = Vec::new();
        for (count, lower) in &groups {
            let Some(upper) = groups.get(&(count + 1)) else {
                continue;
            };
            for &i in lower {
                for &j in upper {
                    if let Some(merged) = current[i].combine(&current[j]) {
                        used[i] = true;
                        used[j] = true;
                        if !next.contains(&merged) {
                            next.push(merged);
                        }
                    }
                }
            }
        }

        for (idx, cube) in current.into_iter().enumerate() {
            if !used[idx] && !primes.contains(&cube) {
                primes.push(cube);
            }
        }
        current = next;
    }

    primes
}

/// Petrick's method over the terms the essential primes left uncovered.
///
/// Each entry of `uncovered` lists the primes covering one term. Products
/// are kept absorbed (no product is a superset of another) and sorted by
/// size, then lexicographically.
fn petrick(uncovered: &[&[usize]]) -> BTreeSet<usize> {
    let mut products: Vec<BTreeSet<usize>> = vec![BTreeSet::new()];
    for covering in uncovered {
        let mut next: Vec<BTreeSet<usize>> = Vec::new();
        for product in &products {
            if product.iter().any(|p| covering.contains(p)) {
                next.push(product.clone());
                continue;
            }
            for prime in covering.iter() {
                let mut extended = product.clone();
                extended.insert(*prime);
                next.push(extended);
            }
        }
        next.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        let mut kept: Vec<BTreeSet<usize>> = Vec::with_capacity(next.len());
        for product in next {
            if !kept.iter().any(|k| k.is_subset(&product)) {
                kept.push(product);
            }
        }
        products = kept;
    }
    products.into_iter().next().unwrap_or_default()
}

/// Chooses the prime indices forming a minimal cover of `terms`.
fn select_cover(terms: &[Cube], primes: &[Cube]) -> BTreeSet<usize> {
    let coverage: Vec<Vec<usize>> = terms
        .iter()
        .map(|term| {
            primes
                .iter()
                .enumerate()
                .filter(|(_, prime)| prime.covers(term))
                .map(|(idx, _)| idx)
                .collect()
        })
        .collect();

    let mut chosen: BTreeSet<usize> = coverage
        .iter()
        .filter(|covering| covering.len() == 1)
        .map(|covering| covering[0])
        .collect();

    let uncovered: Vec<&[usize]> = coverage
        .iter()
        .filter(|covering| !covering.iter().any(|p| chosen.contains(p)))
        .map(Vec::as_slice)
        .collect();
    chosen.extend(petrick(&uncovered));
    chosen
}

/// Minimal sum-of-products cover of `terms`.
///
/// All terms must share the same width. An all-zero term is a legal input
/// and yields an all-zero implicant.
pub fn minimize(terms: &[Cube]) -> Vec<Cube> {
    let terms = dedup(terms);
    if terms.is_empty() {
        return Vec::new();
    }
    let primes = prime_implicants(&terms);
    select_cover(&terms, &primes)
        .into_iter()
        .filter_map(|idx| primes.get(idx).cloned())
        .collect()
}
