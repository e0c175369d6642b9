//! Consensus Hint
//!
//! Turns the revealed votes of one issue into a recommended estimation and a
//! verdict on whether the team actually agrees. Distances are measured in
//! deck positions, never by parsing card values as numbers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::game::state::{Deck, PlayerId, VoteResult, VoteValue, UNCERTAIN_VALUE};

/// Largest tolerated distance of a single vote from the median.
pub const MAX_DEVIATION: usize = 1;

/// Largest tolerated mean distance from the median.
pub const MAX_MEAN_DEVIATION: f64 = 0.5;

const EPSILON: f64 = 1e-9;

/// Recommendation for a revealed issue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    /// Recommended estimation (deck card at the median position).
    #[serde(default)]
    pub value: Option<VoteValue>,
    /// Whether the votes are close enough to accept the recommendation.
    pub acceptable: bool,
    /// Human readable advice.
    pub advice: String,
}

/// Why a hint was given.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Advice {
    /// Everybody picked the same card.
    Unanimous,
    /// Mean distance below 0.25.
    Strong,
    /// Mean distance below 0.5.
    Rough,
    /// Mean distance exactly 0.5.
    Borderline,
    /// No countable votes.
    NobodyVoted,
    /// Some vote is more than one card away from the median.
    OutlierVotes,
    /// Votes are spread too widely on average.
    TooMuchVariety,
}

impl Advice {
    /// Whether this advice accepts the recommendation.
    pub fn acceptable(self) -> bool {
        matches!(
            self,
            Advice::Unanimous | Advice::Strong | Advice::Rough | Advice::Borderline
        )
    }

    /// Message shown to players.
    pub fn message(self) -> &'static str {
        match self {
            Advice::Unanimous => "Absolute consensus, well done!",
            Advice::Strong => "Strong consensus.",
            Advice::Rough => "Rough consensus, good enough.",
            Advice::Borderline => "Barely a consensus, consider a quick discussion.",
            Advice::NobodyVoted => "Nobody voted.",
            Advice::OutlierVotes => "Some estimations are too far apart, discuss and vote again.",
            Advice::TooMuchVariety => "Too much variety in estimations, discuss and vote again.",
        }
    }
}

/// Hint computation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HintError {
    /// A stored vote is not a card of the deck.
    #[error("vote value {0:?} is not in the deck")]
    UnknownValue(String),
}

/// Deviation statistics in deck positions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Spread {
    /// Median position.
    pub median: usize,
    /// Largest distance from the median.
    pub max: usize,
    /// Mean distance from the median.
    pub mean: f64,
}

/// Median of `indices`: the element at `len / 2` after sorting, which is the
/// upper-middle element for even counts.
pub fn median(indices: &[usize]) -> Option<usize> {
    if indices.is_empty() {
        return None;
    }
    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    Some(sorted[sorted.len() / 2])
}

/// Median plus maximum and mean absolute deviation.
pub fn spread(indices: &[usize]) -> Option<Spread> {
    let median = median(indices)?;
    let deviations: Vec<usize> = indices.iter().map(|&i| i.abs_diff(median)).collect();
    let max = deviations.iter().copied().max().unwrap_or(0);
    let mean = deviations.iter().sum::<usize>() as f64 / deviations.len() as f64;
    Some(Spread { median, max, mean })
}

/// Classify a spread. The variety check runs last so it wins over the
/// outlier check when both trip.
pub fn advise(spread: &Spread) -> Advice {
    let borderline = (spread.mean - MAX_MEAN_DEVIATION).abs() < EPSILON;

    let mut rejection = None;
    if spread.max > MAX_DEVIATION {
        rejection = Some(Advice::OutlierVotes);
    }
    if spread.mean > MAX_MEAN_DEVIATION && !borderline {
        rejection = Some(Advice::TooMuchVariety);
    }
    if let Some(advice) = rejection {
        return advice;
    }

    if spread.mean.abs() < EPSILON {
        Advice::Unanimous
    } else if spread.mean < 0.25 {
        Advice::Strong
    } else if borderline {
        Advice::Borderline
    } else {
        Advice::Rough
    }
}

/// Compute the hint for one issue's votes.
///
/// Hidden votes and the uncertain card are ignored. A value missing from the
/// deck is reported as an error: it can only come from corrupted state.
pub fn compute_hint(
    deck: &Deck,
    votes: &BTreeMap<PlayerId, VoteResult>,
) -> Result<Hint, HintError> {
    let mut indices = Vec::with_capacity(votes.len());
    for vote in votes.values() {
        let Some(value) = &vote.value else { continue };
        if value.as_str() == UNCERTAIN_VALUE {
            continue;
        }
        let index = deck
            .index_of(value)
            .ok_or_else(|| HintError::UnknownValue(value.0.clone()))?;
        indices.push(index);
    }

    let Some(spread) = spread(&indices) else {
        return Ok(Hint {
            value: None,
            acceptable: false,
            advice: Advice::NobodyVoted.message().to_string(),
        });
    };

    let advice = advise(&spread);
    Ok(Hint {
        value: deck.get(spread.median).cloned(),
        acceptable: advice.acceptable(),
        advice: advice.message().to_string(),
    })
}
