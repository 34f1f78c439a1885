//! Sorted set payload and the weighted union/intersection engine

use bytes::Bytes;
use ordered_float::OrderedFloat;
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

/// Member -> score map kept sorted by (score, member)
#[derive(Debug, Clone, Default)]
pub struct ZSet {
    scores: HashMap<Bytes, f64>,
    ordered: BTreeSet<(OrderedFloat<f64>, Bytes)>,
}

impl ZSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// View a plain set as a sorted set where every member scores 1.0
    pub fn from_members<'a>(members: impl IntoIterator<Item = &'a Bytes>) -> Self {
        let mut zset = ZSet::new();
        for member in members {
            zset.insert(member.clone(), 1.0);
        }
        zset
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Set the score of `member`. Returns true if the member is new.
    pub fn insert(&mut self, member: Bytes, score: f64) -> bool {
        match self.scores.insert(member.clone(), score) {
            Some(old) => {
                self.ordered.remove(&(OrderedFloat(old), member.clone()));
                self.ordered.insert((OrderedFloat(score), member));
                false
            }
            None => {
                self.ordered.insert((OrderedFloat(score), member));
                true
            }
        }
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).copied()
    }

    pub fn contains(&self, member: &[u8]) -> bool {
        self.scores.contains_key(member)
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self.scores.remove_entry(member) {
            Some((member, score)) => {
                self.ordered.remove(&(OrderedFloat(score), member));
                true
            }
            None => false,
        }
    }

    /// Members in ascending (score, member) order
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&Bytes, f64)> + '_ {
        self.ordered.iter().map(|(score, member)| (member, score.0))
    }

    pub fn pop_min(&mut self) -> Option<(Bytes, f64)> {
        let (score, member) = self.ordered.pop_first()?;
        self.scores.remove(&member);
        Some((member, score.0))
    }

    pub fn pop_max(&mut self) -> Option<(Bytes, f64)> {
        let (score, member) = self.ordered.pop_last()?;
        self.scores.remove(&member);
        Some((member, score.0))
    }

    /// Members between two ranks (inclusive, negative counts from the end)
    pub fn range_by_rank(&self, start: i64, stop: i64, reverse: bool) -> Vec<(Bytes, f64)> {
        let len = self.len() as i64;
        let start = if start < 0 { (start + len).max(0) } else { start };
        let stop = if stop < 0 { stop + len } else { stop.min(len - 1) };
        if start > stop || start >= len {
            return Vec::new();
        }

        let take = (stop - start + 1) as usize;
        let pick = |(member, score): (&Bytes, f64)| (member.clone(), score);
        if reverse {
            self.iter().rev().skip(start as usize).take(take).map(pick).collect()
        } else {
            self.iter().skip(start as usize).take(take).map(pick).collect()
        }
    }

    pub fn count_in(&self, min: ScoreBound, max: ScoreBound) -> usize {
        self.iter()
            .filter(|(_, score)| min.admits_from_below(*score) && max.admits_from_above(*score))
            .count()
    }
}

/// One end of a score interval: `1.5`, `(1.5`, `-inf`, `+inf`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBound {
    pub value: f64,
    pub exclusive: bool,
}

impl ScoreBound {
    fn admits_from_below(&self, score: f64) -> bool {
        if self.exclusive {
            score > self.value
        } else {
            score >= self.value
        }
    }

    fn admits_from_above(&self, score: f64) -> bool {
        if self.exclusive {
            score < self.value
        } else {
            score <= self.value
        }
    }
}

impl FromStr for ScoreBound {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (text, exclusive) = match s.strip_prefix('(') {
            Some(rest) => (rest, true),
            None => (s, false),
        };
        let value = parse_score(text).ok_or(())?;
        Ok(ScoreBound { value, exclusive })
    }
}

/// Score-combining rule for ZUNION/ZINTER
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Aggregate {
    #[default]
    Sum,
    Min,
    Max,
}

impl Aggregate {
    pub fn parse(name: &[u8]) -> Option<Aggregate> {
        match name.to_ascii_uppercase().as_slice() {
            b"SUM" => Some(Aggregate::Sum),
            b"MIN" => Some(Aggregate::Min),
            b"MAX" => Some(Aggregate::Max),
            _ => None,
        }
    }

    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Aggregate::Sum => a + b,
            Aggregate::Min => a.min(b),
            Aggregate::Max => a.max(b),
        }
    }
}

/// Members present in any source, scores folded left to right
pub fn union<'a>(sources: impl IntoIterator<Item = (&'a ZSet, f64)>, aggregate: Aggregate) -> ZSet {
    let mut combined: HashMap<Bytes, f64> = HashMap::new();
    for (zset, weight) in sources {
        for (member, score) in zset.iter() {
            let weighted = score * weight;
            combined
                .entry(member.clone())
                .and_modify(|acc| *acc = aggregate.apply(*acc, weighted))
                .or_insert(weighted);
        }
    }
    collect(combined)
}

/// Members present in every source, scores folded left to right
pub fn intersect<'a>(
    sources: impl IntoIterator<Item = (&'a ZSet, f64)>,
    aggregate: Aggregate,
) -> ZSet {
    let mut sources = sources.into_iter();
    let Some((first, weight)) = sources.next() else {
        return ZSet::new();
    };

    let mut combined: HashMap<Bytes, f64> = first
        .iter()
        .map(|(member, score)| (member.clone(), score * weight))
        .collect();

    for (zset, weight) in sources {
        combined.retain(|member, acc| match zset.score(member) {
            Some(score) => {
                *acc = aggregate.apply(*acc, score * weight);
                true
            }
            None => false,
        });
        if combined.is_empty() {
            break;
        }
    }
    collect(combined)
}

fn collect(scores: HashMap<Bytes, f64>) -> ZSet {
    let mut zset = ZSet::new();
    for (member, score) in scores {
        zset.insert(member, score);
    }
    zset
}

/// Parse a score argument; accepts `inf`/`+inf`/`-inf`, rejects NaN
pub fn parse_score(text: &str) -> Option<f64> {
    let value = match text.to_ascii_lowercase().as_str() {
        "inf" | "+inf" | "infinity" | "+infinity" => f64::INFINITY,
        "-inf" | "-infinity" => f64::NEG_INFINITY,
        other => other.parse::<f64>().ok()?,
    };
    (!value.is_nan()).then_some(value)
}

/// Score as the server prints it: shortest round-trip digits, `%g` layout.
///
/// Integral values print without a fraction; exponents below -4 or from 17
/// up switch to `1.5e+20` notation.
pub fn format_score(score: f64) -> String {
    if score.is_nan() {
        return "nan".to_string();
    } else if score == f64::INFINITY {
        return "inf".to_string();
    } else if score == f64::NEG_INFINITY {
        return "-inf".to_string();
    }

    let scientific = format!("{:e}", score);
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return format!("{}", score);
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    if (-4..17).contains(&exponent) {
        format!("{}", score)
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exponent.abs())
    }
}
