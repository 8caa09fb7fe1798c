//! # Physical Traits
//!
//! Traits describe how the rows of a relation are realized at runtime, independent of
//! which rows they are. Every node in the memo carries one `TraitSet` with exactly one value
//! per dimension:
//!
//! - **Convention**: whether the node is a logical description or an executable physical
//!   operator. Only physical nodes may appear in the final plan.
//! - **Distribution**: how rows are partitioned across parallel execution units.
//! - **Collation**: the sort order the rows are guaranteed to arrive in.
//!
//! ## Satisfaction
//!
//! A parent asks its children for a *required* trait set and receives a *provided* one.
//! `provided.satisfies(required)` holds per dimension:
//!
//! - Convention: a required `Any` accepts everything, otherwise exact match.
//! - Distribution: a required `Any` accepts everything, otherwise exact match. Hash keys
//!   are compared positionally, so `Hash([0, 1])` does not satisfy `Hash([1, 0])`.
//! - Collation: the required ordering must be a prefix of the provided ordering. Sorting
//!   by `(a, b, c)` also delivers rows sorted by `(a, b)`.
//!
//! When no alternative satisfies a requirement natively, the planner inserts an enforcer
//! (Exchange for distribution, Sort for collation) and costs it like any other operator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Behavior shared by every trait dimension.
pub trait RelTrait {
    /// Whether a relation delivering `self` meets the requirement `required`.
    fn satisfies(&self, required: &Self) -> bool;

    /// Whether this value places no requirement at all.
    fn is_any(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Convention {
    Any,
    Logical,
    Physical,
}

impl RelTrait for Convention {
    fn satisfies(&self, required: &Self) -> bool {
        required.is_any() || self == required
    }

    fn is_any(&self) -> bool {
        matches!(self, Convention::Any)
    }
}

/// How rows are spread over execution units. Keys are output ordinals.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Distribution {
    Any,
    /// All rows on a single unit (the coordinator for the final result).
    Singleton,
    Hash(Vec<u32>),
    Range(Vec<u32>),
    /// Partitioned without any data-locality guarantee.
    Random,
    /// Every unit holds a full copy.
    Broadcast,
}

impl Distribution {
    /// Carry the distribution through a column mapping (for example a projection).
    ///
    /// A partitioning whose keys do not all survive the mapping is still partitioned, just
    /// no longer on anything the parent can name, so it degrades to `Random`.
    pub fn remap<F>(&self, mapping: F) -> Distribution
    where
        F: Fn(u32) -> Option<u32>,
    {
        let remap_keys = |keys: &[u32]| keys.iter().map(|&k| mapping(k)).collect::<Option<Vec<_>>>();
        match self {
            Distribution::Hash(keys) => {
                remap_keys(keys).map_or(Distribution::Random, Distribution::Hash)
            }
            Distribution::Range(keys) => {
                remap_keys(keys).map_or(Distribution::Random, Distribution::Range)
            }
            other => other.clone(),
        }
    }

    /// Whether rows live on more than one execution unit.
    pub fn is_distributed(&self) -> bool {
        matches!(
            self,
            Distribution::Hash(_) | Distribution::Range(_) | Distribution::Random
        )
    }
}

impl RelTrait for Distribution {
    fn satisfies(&self, required: &Self) -> bool {
        required.is_any() || self == required
    }

    fn is_any(&self) -> bool {
        matches!(self, Distribution::Any)
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Distribution::Any => write!(f, "any"),
            Distribution::Singleton => write!(f, "singleton"),
            Distribution::Hash(keys) => write!(f, "hash{keys:?}"),
            Distribution::Range(keys) => write!(f, "range{keys:?}"),
            Distribution::Random => write!(f, "random"),
            Distribution::Broadcast => write!(f, "broadcast"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NullDirection {
    First,
    Last,
}

/// Sort specification for one output field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldCollation {
    pub field: u32,
    pub direction: Direction,
    pub nulls: NullDirection,
}

impl FieldCollation {
    pub fn asc(field: u32) -> Self {
        Self {
            field,
            direction: Direction::Ascending,
            nulls: NullDirection::Last,
        }
    }

    pub fn desc(field: u32) -> Self {
        Self {
            field,
            direction: Direction::Descending,
            nulls: NullDirection::First,
        }
    }
}

impl fmt::Display for FieldCollation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            Direction::Ascending => "ASC",
            Direction::Descending => "DESC",
        };
        let nulls = match self.nulls {
            NullDirection::First => "NULLS FIRST",
            NullDirection::Last => "NULLS LAST",
        };
        write!(f, "${} {dir} {nulls}", self.field)
    }
}

/// Ordered list of sort keys. Empty means "no guaranteed order".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Collation(pub Vec<FieldCollation>);

impl Collation {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Ascending collation on the given fields.
    pub fn of(fields: &[u32]) -> Self {
        Self(fields.iter().map(|&f| FieldCollation::asc(f)).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> &[FieldCollation] {
        &self.0
    }

    pub fn fields(&self) -> Vec<u32> {
        self.0.iter().map(|k| k.field).collect()
    }

    /// Carry the collation through a column mapping. The ordering is cut at the first key
    /// that does not survive: a prefix of a sort order is still a valid sort order.
    pub fn remap<F>(&self, mapping: F) -> Collation
    where
        F: Fn(u32) -> Option<u32>,
    {
        Collation(
            self.0
                .iter()
                .map_while(|k| mapping(k.field).map(|field| FieldCollation { field, ..*k }))
                .collect(),
        )
    }
}

impl RelTrait for Collation {
    fn satisfies(&self, required: &Self) -> bool {
        required.0.len() <= self.0.len() && required.0.iter().zip(&self.0).all(|(r, p)| r == p)
    }

    fn is_any(&self) -> bool {
        self.is_empty()
    }
}

impl fmt::Display for Collation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, k) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}")?;
        }
        write!(f, "]")
    }
}

/// One value per trait dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraitSet {
    pub convention: Convention,
    pub distribution: Distribution,
    pub collation: Collation,
}

impl TraitSet {
    /// No requirement in any dimension.
    pub fn any() -> Self {
        Self {
            convention: Convention::Any,
            distribution: Distribution::Any,
            collation: Collation::empty(),
        }
    }

    pub fn logical() -> Self {
        Self {
            convention: Convention::Logical,
            ..Self::any()
        }
    }

    /// Physical, with no distribution or ordering requirement.
    pub fn physical() -> Self {
        Self {
            convention: Convention::Physical,
            ..Self::any()
        }
    }

    /// Requirement for the root of a query: a physical plan gathered on a single unit.
    pub fn root() -> Self {
        Self {
            convention: Convention::Physical,
            distribution: Distribution::Singleton,
            collation: Collation::empty(),
        }
    }

    pub fn with_convention(&self, convention: Convention) -> Self {
        Self {
            convention,
            ..self.clone()
        }
    }

    pub fn with_distribution(&self, distribution: Distribution) -> Self {
        Self {
            distribution,
            ..self.clone()
        }
    }

    pub fn with_collation(&self, collation: Collation) -> Self {
        Self {
            collation,
            ..self.clone()
        }
    }

    pub fn satisfies(&self, required: &TraitSet) -> bool {
        self.convention.satisfies(&required.convention)
            && self.distribution.satisfies(&required.distribution)
            && self.collation.satisfies(&required.collation)
    }

    /// Drop information that cannot matter: any order holds for at most one row.
    pub fn simplify(&self, max_rows: Option<f64>) -> TraitSet {
        match max_rows {
            Some(n) if n <= 1.0 => self.with_collation(Collation::empty()),
            _ => self.clone(),
        }
    }

    pub fn remap<F>(&self, mapping: F) -> TraitSet
    where
        F: Fn(u32) -> Option<u32>,
    {
        TraitSet {
            convention: self.convention,
            distribution: self.distribution.remap(&mapping),
            collation: self.collation.remap(&mapping),
        }
    }
}

impl fmt::Display for TraitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let conv = match self.convention {
            Convention::Any => "ANY",
            Convention::Logical => "LOGICAL",
            Convention::Physical => "PHYSICAL",
        };
        write!(f, "{conv}.{}", self.distribution)?;
        if !self.collation.is_empty() {
            write!(f, ".{}", self.collation)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collation_prefix_satisfaction() {
        let abc = Collation::of(&[0, 1, 2]);
        let ab = Collation::of(&[0, 1]);
        assert!(abc.satisfies(&ab));
        assert!(!ab.satisfies(&abc));
        assert!(ab.satisfies(&Collation::empty()));
        assert!(!Collation::of(&[1]).satisfies(&Collation::of(&[0])));
    }

    #[test]
    fn test_distribution_any_accepts_everything() {
        assert!(Distribution::Hash(vec![0, 1]).satisfies(&Distribution::Any));
        assert!(!Distribution::Hash(vec![0, 1]).satisfies(&Distribution::Hash(vec![1, 0])));
        assert!(!Distribution::Random.satisfies(&Distribution::Singleton));
    }

    #[test]
    fn test_trait_set_satisfies_per_dimension() {
        let provided = TraitSet::root().with_collation(Collation::of(&[2]));
        assert!(provided.satisfies(&TraitSet::root()));
        assert!(provided.satisfies(&TraitSet::any()));
        assert!(!TraitSet::logical().satisfies(&TraitSet::physical()));
    }

    #[test]
    fn test_simplify_drops_collation_for_single_row() {
        let sorted = TraitSet::physical().with_collation(Collation::of(&[0]));
        assert!(sorted.simplify(Some(1.0)).collation.is_empty());
        assert_eq!(sorted.simplify(Some(10.0)), sorted);
    }

    #[test]
    fn test_remap_through_projection() {
        // Output $0 is input $2; input $1 is projected away.
        let mapping = |i: u32| if i == 2 { Some(0) } else { None };
        let traits = TraitSet::physical()
            .with_distribution(Distribution::Hash(vec![1]))
            .with_collation(Collation::of(&[2, 1]));
        let remapped = traits.remap(mapping);
        assert_eq!(remapped.distribution, Distribution::Random);
        assert_eq!(remapped.collation, Collation::of(&[0]));
    }
}
