use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
};

use crate::model::{Element, Kind};

/// An element present on both sides whose fields differ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementUpdate {
    /// The new definition. Only `changed` fields of it are sent.
    pub desired: Element,
    /// Remote identity carried over from the observed element.
    pub id: Option<String>,
    pub changed: BTreeSet<String>,
}

/// The create/update/delete delta of one kind. Derived on every pass and
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changeset {
    pub kind: Kind,
    pub create: Vec<Element>,
    pub update: BTreeMap<String, ElementUpdate>,
    /// Observed elements, so remote ids are at hand.
    pub delete: Vec<Element>,
}
impl Changeset {
    pub fn new(kind: Kind) -> Self {
        Changeset {
            kind,
            create: Vec::new(),
            update: BTreeMap::new(),
            delete: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }

    pub fn summary(&self) -> ChangesetSummary {
        ChangesetSummary {
            create: self.create.len(),
            update: self.update.len(),
            delete: self.delete.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChangesetSummary {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
}
impl ChangesetSummary {
    pub fn total(&self) -> usize {
        self.create + self.update + self.delete
    }
}
impl std::ops::AddAssign for ChangesetSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.create += rhs.create;
        self.update += rhs.update;
        self.delete += rhs.delete;
    }
}
impl Display for ChangesetSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "+{} ~{} -{}", self.create, self.update, self.delete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts() {
        let mut cs = Changeset::new(Kind::Backend);
        assert!(cs.is_empty());
        cs.create.push(Element::new("a"));
        cs.delete.push(Element::new("b"));
        cs.delete.push(Element::new("c"));
        let s = cs.summary();
        assert_eq!(s.to_string(), "+1 ~0 -2");
        assert_eq!(s.total(), 3);
        assert!(!cs.is_empty());
    }
}
