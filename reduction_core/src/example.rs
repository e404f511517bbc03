//! Examples, labels and the per-feature traversal used by every learner.
//!
//! An [`Example`] is an ordered set of namespaces, each holding hashed
//! `(index, value)` features, plus a label, an importance weight and a mutable
//! prediction slot. A batch (multi-line example) is a slice of examples: an
//! optional shared example, one or more action examples and optionally a
//! trailing feedback example.

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

use crate::error::{ConfigError, ConfigResult};

/// Namespace identifier: the first byte of the namespace name.
pub type NamespaceIndex = u8;

/// Multiplier used to combine feature indices of interaction terms.
pub const FNV_PRIME: u64 = 16_777_619;

/// One hashed feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub index: u64,
    pub value: f32,
}

/// Features of a single namespace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Features {
    entries: Vec<Feature>,
}

impl Features {
    pub fn push(&mut self, index: u64, value: f32) {
        self.entries.push(Feature { index, value });
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Feature> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[Feature] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Role of an example inside an interaction-grounded batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExampleType {
    #[default]
    Unset,
    Shared,
    Action,
    Feedback,
}

impl std::fmt::Display for ExampleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExampleType::Unset => "unset",
            ExampleType::Shared => "shared",
            ExampleType::Action => "action",
            ExampleType::Feedback => "feedback",
        };
        f.write_str(name)
    }
}

/// One contextual-bandit cost entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CbClass {
    pub cost: f32,
    pub action: u32,
    pub probability: f32,
}

impl CbClass {
    pub fn observed(cost: f32, action: u32, probability: f32) -> Self {
        Self {
            cost,
            action,
            probability,
        }
    }

    /// A cost was logged for this entry (not the unknown-cost sentinel).
    pub fn has_observed_cost(&self) -> bool {
        self.cost != f32::MAX && self.probability > 0.0
    }
}

/// Contextual-bandit label; at most one entry carries an observed cost.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CbLabel {
    pub costs: Vec<CbClass>,
}

impl CbLabel {
    pub fn observed_cost(&self) -> Option<&CbClass> {
        self.costs.iter().find(|c| c.has_observed_cost())
    }

    pub fn observed_cost_mut(&mut self) -> Option<&mut CbClass> {
        self.costs.iter_mut().find(|c| c.has_observed_cost())
    }
}

/// Label variants understood by the learners in this crate.
#[derive(Debug, Clone, PartialEq)]
pub enum Label {
    /// Regression/classification target; `None` marks an unlabeled example.
    Simple(Option<f32>),
    Cb(CbLabel),
}

impl Default for Label {
    fn default() -> Self {
        Label::Simple(None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionScore {
    pub action: u32,
    pub score: f32,
}

/// Prediction slot written by learners.
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    Scalar(f32),
    ActionScores(Vec<ActionScore>),
}

impl Default for Prediction {
    fn default() -> Self {
        Prediction::Scalar(0.0)
    }
}

/// A single-line example.
#[derive(Debug, Clone)]
pub struct Example {
    namespaces: Vec<(NamespaceIndex, Features)>,
    pub label: Label,
    pub weight: f32,
    pub kind: ExampleType,
    /// Added to every feature index; selects the problem a node learns.
    pub ft_offset: u64,
    /// Holdout examples are predicted and scored but never learned.
    pub holdout: bool,
    pub partial_prediction: f32,
    pub pred: Prediction,
    pub loss: f32,
    pub num_features_from_interactions: usize,
}

impl Default for Example {
    fn default() -> Self {
        Self::new()
    }
}

impl Example {
    pub fn new() -> Self {
        Self {
            namespaces: Vec::new(),
            label: Label::default(),
            weight: 1.0,
            kind: ExampleType::Unset,
            ft_offset: 0,
            holdout: false,
            partial_prediction: 0.0,
            pred: Prediction::default(),
            loss: 0.0,
            num_features_from_interactions: 0,
        }
    }

    pub fn with_label(mut self, label: Label) -> Self {
        self.label = label;
        self
    }

    pub fn with_kind(mut self, kind: ExampleType) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    /// Append a feature, registering the namespace on first use.
    pub fn push_feature(&mut self, namespace: NamespaceIndex, index: u64, value: f32) {
        self.namespace_mut(namespace).push(index, value);
    }

    pub fn namespace_mut(&mut self, namespace: NamespaceIndex) -> &mut Features {
        let position = match self.namespaces.iter().position(|(ns, _)| *ns == namespace) {
            Some(position) => position,
            None => {
                self.namespaces.push((namespace, Features::default()));
                self.namespaces.len() - 1
            }
        };
        &mut self.namespaces[position].1
    }

    pub fn features(&self, namespace: NamespaceIndex) -> Option<&Features> {
        self.namespaces
            .iter()
            .find(|(ns, _)| *ns == namespace)
            .map(|(_, fs)| fs)
    }

    /// Namespaces in insertion order.
    pub fn namespaces(&self) -> impl Iterator<Item = (NamespaceIndex, &Features)> + '_ {
        self.namespaces.iter().map(|(ns, fs)| (*ns, fs))
    }

    pub fn indices(&self) -> Vec<NamespaceIndex> {
        self.namespaces.iter().map(|(ns, _)| *ns).collect()
    }

    pub fn num_features(&self) -> usize {
        self.namespaces.iter().map(|(_, fs)| fs.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.num_features() == 0
    }

    /// Copy every namespace of `source` (indices and features) into `self`.
    pub fn copy_namespaces_from(&mut self, source: &Example) {
        for (ns, fs) in source.namespaces() {
            let target = self.namespace_mut(ns);
            for feature in fs.iter() {
                target.push(feature.index, feature.value);
            }
        }
    }

    /// Return the example to a pristine state: no namespaces, no features,
    /// default label, unit weight, zeroed prediction slot.
    pub fn clear(&mut self) {
        self.namespaces.clear();
        self.label = Label::default();
        self.weight = 1.0;
        self.kind = ExampleType::Unset;
        self.ft_offset = 0;
        self.holdout = false;
        self.partial_prediction = 0.0;
        self.pred = Prediction::default();
        self.loss = 0.0;
        self.num_features_from_interactions = 0;
    }

    pub fn simple_label(&self) -> Option<f32> {
        match self.label {
            Label::Simple(label) => label,
            Label::Cb(_) => None,
        }
    }

    pub fn cb_label(&self) -> Option<&CbLabel> {
        match &self.label {
            Label::Cb(label) => Some(label),
            Label::Simple(_) => None,
        }
    }

    pub fn cb_label_mut(&mut self) -> Option<&mut CbLabel> {
        match &mut self.label {
            Label::Cb(label) => Some(label),
            Label::Simple(_) => None,
        }
    }

    /// True when this example carries the batch's observed cost.
    pub fn has_observed_cost(&self) -> bool {
        self.cb_label()
            .map(|label| label.observed_cost().is_some())
            .unwrap_or(false)
    }

    /// Scalar prediction; `0.0` when the slot holds action scores.
    pub fn scalar(&self) -> f32 {
        match self.pred {
            Prediction::Scalar(value) => value,
            Prediction::ActionScores(_) => 0.0,
        }
    }

    pub fn action_scores(&self) -> Option<&[ActionScore]> {
        match &self.pred {
            Prediction::ActionScores(scores) => Some(scores),
            Prediction::Scalar(_) => None,
        }
    }
}

/// Hashes `(namespace, token)` pairs into feature indices.
///
/// Indices are scaled by the stack's problem multiplier so that a node
/// learning problem `i` (offset `i`) never lands on another problem's group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureHasher {
    mask: u64,
    multiplier: u64,
}

impl FeatureHasher {
    /// `bits` sizes the weight table; `multiplier` must be a power of two.
    pub fn new(bits: u32, multiplier: u64) -> Self {
        Self {
            mask: (1u64 << bits) - 1,
            multiplier: multiplier.max(1),
        }
    }

    pub fn multiplier(&self) -> u64 {
        self.multiplier
    }

    pub fn namespace_seed(namespace: &str) -> u64 {
        xxh64(namespace.as_bytes(), 0)
    }

    pub fn hash(&self, namespace: &str, token: &str) -> u64 {
        let raw = xxh64(token.as_bytes(), Self::namespace_seed(namespace));
        raw.wrapping_mul(self.multiplier) & self.mask
    }
}

/// Namespace index for a namespace name (its first byte, space when empty).
pub fn namespace_index(namespace: &str) -> NamespaceIndex {
    namespace.as_bytes().first().copied().unwrap_or(b' ')
}

/// Parse interaction strings such as `"UA"` or `"UAF"` into namespace terms.
pub fn parse_interactions(patterns: &[String]) -> ConfigResult<Vec<Vec<NamespaceIndex>>> {
    patterns
        .iter()
        .map(|pattern| {
            let term: Vec<NamespaceIndex> = pattern.bytes().collect();
            if term.len() == 2 || term.len() == 3 {
                Ok(term)
            } else {
                Err(ConfigError::invalid(
                    "interactions",
                    format!("'{pattern}' must name 2 (quadratic) or 3 (cubic) namespaces"),
                ))
            }
        })
        .collect()
}

/// Visit every linear feature of `ec` and every interaction term expanded
/// from `interactions`, calling `visit(value, index + ft_offset)`.
///
/// Returns the number of features generated by interactions.
pub fn foreach_feature<F>(ec: &Example, interactions: &[Vec<NamespaceIndex>], mut visit: F) -> usize
where
    F: FnMut(f32, u64),
{
    let offset = ec.ft_offset;
    for (_, fs) in ec.namespaces() {
        for feature in fs.iter() {
            visit(feature.value, feature.index.wrapping_add(offset));
        }
    }

    let mut generated = 0;
    for term in interactions {
        generated += match term.as_slice() {
            [a, b] => expand_quadratic(ec, *a, *b, offset, &mut visit),
            [a, b, c] => expand_cubic(ec, *a, *b, *c, offset, &mut visit),
            _ => 0,
        };
    }
    generated
}

fn expand_quadratic<F>(ec: &Example, a: NamespaceIndex, b: NamespaceIndex, offset: u64, visit: &mut F) -> usize
where
    F: FnMut(f32, u64),
{
    let (Some(first), Some(second)) = (ec.features(a), ec.features(b)) else {
        return 0;
    };
    let same = a == b;
    let mut generated = 0;
    for (i, f1) in first.iter().enumerate() {
        let halfhash = f1.index.wrapping_mul(FNV_PRIME);
        let start = if same { i } else { 0 };
        for f2 in &second.as_slice()[start..] {
            visit(f1.value * f2.value, (halfhash ^ f2.index).wrapping_add(offset));
            generated += 1;
        }
    }
    generated
}

fn expand_cubic<F>(
    ec: &Example,
    a: NamespaceIndex,
    b: NamespaceIndex,
    c: NamespaceIndex,
    offset: u64,
    visit: &mut F,
) -> usize
where
    F: FnMut(f32, u64),
{
    let (Some(first), Some(second), Some(third)) = (ec.features(a), ec.features(b), ec.features(c))
    else {
        return 0;
    };
    let mut generated = 0;
    for (i, f1) in first.iter().enumerate() {
        let start_j = if a == b { i } else { 0 };
        for (j, f2) in second.as_slice().iter().enumerate().skip(start_j) {
            let halfhash = (f1.index.wrapping_mul(FNV_PRIME) ^ f2.index).wrapping_mul(FNV_PRIME);
            let value = f1.value * f2.value;
            let start_k = if b == c { j } else { 0 };
            for f3 in &third.as_slice()[start_k..] {
                visit(value * f3.value, (halfhash ^ f3.index).wrapping_add(offset));
                generated += 1;
            }
        }
    }
    generated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(ec: &Example, interactions: &[Vec<NamespaceIndex>]) -> (Vec<(f32, u64)>, usize) {
        let mut seen = Vec::new();
        let generated = foreach_feature(ec, interactions, |x, i| seen.push((x, i)));
        (seen, generated)
    }

    #[test]
    fn clear_leaves_no_stale_namespaces() {
        let mut ec = Example::new().with_label(Label::Simple(Some(1.0))).with_weight(3.0);
        ec.push_feature(b'a', 4, 1.0);
        ec.push_feature(b'b', 8, 2.0);
        ec.ft_offset = 1;
        ec.clear();

        assert!(ec.is_empty());
        assert!(ec.indices().is_empty());
        assert_eq!(ec.label, Label::Simple(None));
        assert_eq!(ec.weight, 1.0);
        assert_eq!(ec.ft_offset, 0);
        assert!(ec.features(b'a').is_none());
    }

    #[test]
    fn linear_features_respect_offset() {
        let mut ec = Example::new();
        ec.push_feature(b'a', 10, 0.5);
        ec.ft_offset = 1;
        let (seen, generated) = collect(&ec, &[]);
        assert_eq!(seen, vec![(0.5, 11)]);
        assert_eq!(generated, 0);
    }

    #[test]
    fn quadratic_same_namespace_skips_permutations() {
        let mut ec = Example::new();
        ec.push_feature(b'a', 2, 1.0);
        ec.push_feature(b'a', 4, 2.0);
        let (_, generated) = collect(&ec, &[vec![b'a', b'a']]);
        // (2,2) (2,4) (4,4)
        assert_eq!(generated, 3);
    }

    #[test]
    fn quadratic_index_uses_fnv_combination() {
        let mut ec = Example::new();
        ec.push_feature(b'u', 6, 2.0);
        ec.push_feature(b'a', 8, 3.0);
        let (seen, generated) = collect(&ec, &[vec![b'u', b'a']]);
        assert_eq!(generated, 1);
        let (value, index) = seen[2];
        assert_eq!(value, 6.0);
        assert_eq!(index, 6u64.wrapping_mul(FNV_PRIME) ^ 8);
    }

    #[test]
    fn cubic_requires_all_namespaces() {
        let mut ec = Example::new();
        ec.push_feature(b'u', 6, 1.0);
        ec.push_feature(b'a', 8, 1.0);
        let (_, generated) = collect(&ec, &[vec![b'u', b'a', b'f']]);
        assert_eq!(generated, 0);

        ec.push_feature(b'f', 10, 1.0);
        ec.push_feature(b'f', 12, 1.0);
        let (_, generated) = collect(&ec, &[vec![b'u', b'a', b'f']]);
        assert_eq!(generated, 2);
    }

    #[test]
    fn hashed_indices_are_multiples_of_multiplier() {
        let hasher = FeatureHasher::new(18, 2);
        for token in ["user=Tom", "user=Anna", "article=music", "feedback=like"] {
            let index = hasher.hash("User", token);
            assert_eq!(index % 2, 0);
            assert!(index < (1 << 18));
        }
        assert_ne!(hasher.hash("User", "x"), hasher.hash("Action", "x"));
    }

    #[test]
    fn interactions_must_be_quadratic_or_cubic() {
        assert!(parse_interactions(&["UA".to_string(), "UAF".to_string()]).is_ok());
        assert!(parse_interactions(&["U".to_string()]).is_err());
    }

    #[test]
    fn copy_namespaces_appends_every_feature() {
        let mut source = Example::new();
        source.push_feature(b'u', 1, 1.0);
        source.push_feature(b'a', 2, 0.5);
        let mut target = Example::new();
        target.copy_namespaces_from(&source);
        assert_eq!(target.indices(), vec![b'u', b'a']);
        assert_eq!(target.num_features(), 2);
    }
}
