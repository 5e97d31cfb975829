use crate::score::ScoreTable;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use serde::Deserialize;
use sha2::{Digest, Sha256};

/// A `MutationRule` turns the session sample into the buffer for one iteration.
///
/// Implementations must be deterministic: the same `(seed, index, sample, scores)`
/// always yields the same bytes, so a finding can be reproduced from its index.
/// The returned buffer never aliases `sample`.
///
/// Any `Fn(&str, u64, &[u8], &ScoreTable) -> Vec<u8>` is a rule, which makes it
/// easy to swap in an ad-hoc policy without touching the harness or driver.
pub trait MutationRule: Send + Sync {
    fn mutate(&self, seed: &str, index: u64, sample: &[u8], scores: &ScoreTable) -> Vec<u8>;
}

impl<F> MutationRule for F
where
    F: Fn(&str, u64, &[u8], &ScoreTable) -> Vec<u8> + Send + Sync,
{
    fn mutate(&self, seed: &str, index: u64, sample: &[u8], scores: &ScoreTable) -> Vec<u8> {
        self(seed, index, sample, scores)
    }
}

/// Builds the random stream for one iteration.
///
/// The key is `seed` followed by the decimal form of `index`; its SHA-256 digest
/// seeds a `ChaCha8Rng`, so the stream does not depend on word size or call order.
pub fn iteration_rng(seed: &str, index: u64) -> ChaCha8Rng {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(index.to_string().as_bytes());
    let digest = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    ChaCha8Rng::from_seed(key)
}

/// The default rule: every in-range entry with a positive score has its byte
/// replaced by a uniformly drawn value.
///
/// Only the sign of the score matters. Entries are visited in table order and
/// one value is drawn per positive in-range entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThresholdRule;

impl MutationRule for ThresholdRule {
    fn mutate(&self, seed: &str, index: u64, sample: &[u8], scores: &ScoreTable) -> Vec<u8> {
        let mut rng = iteration_rng(seed, index);
        let mut buffer = sample.to_vec();

        for entry in scores {
            let Some(byte) = buffer.get_mut(entry.offset as usize) else {
                continue;
            };
            if entry.score > 0 {
                *byte = rng.random::<u8>();
            }
        }

        buffer
    }
}

/// Treats each score as a mutation weight relative to the table's largest score.
///
/// A positive entry is rewritten with probability `score / max_score`. The
/// decision is drawn before the replacement value. Zero scores and out-of-range
/// offsets are inert, as with [`ThresholdRule`].
#[derive(Debug, Default, Clone, Copy)]
pub struct WeightedRule;

impl MutationRule for WeightedRule {
    fn mutate(&self, seed: &str, index: u64, sample: &[u8], scores: &ScoreTable) -> Vec<u8> {
        let mut rng = iteration_rng(seed, index);
        let mut buffer = sample.to_vec();
        let max_score = f64::from(scores.max_score());

        for entry in scores {
            let Some(byte) = buffer.get_mut(entry.offset as usize) else {
                continue;
            };
            if entry.score == 0 {
                continue;
            }
            let probability = f64::from(entry.score) / max_score;
            if rng.random_bool(probability) {
                *byte = rng.random::<u8>();
            }
        }

        buffer
    }
}

/// Rule selection as it appears in configuration files and on the command line.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RuleKind {
    #[default]
    Threshold,
    Weighted,
}

impl RuleKind {
    pub fn build(self) -> Box<dyn MutationRule> {
        match self {
            RuleKind::Threshold => Box::new(ThresholdRule),
            RuleKind::Weighted => Box::new(WeightedRule),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Threshold => "threshold",
            RuleKind::Weighted => "weighted",
        }
    }
}

impl std::str::FromStr for RuleKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "threshold" => Ok(RuleKind::Threshold),
            "weighted" => Ok(RuleKind::Weighted),
            other => Err(anyhow::anyhow!(
                "unknown mutation rule '{other}', expected 'threshold' or 'weighted'"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn table(pairs: &[(u32, u32)]) -> ScoreTable {
        pairs.iter().copied().collect()
    }

    #[test]
    fn threshold_rule_mutates_positive_and_skips_zero_and_out_of_range() {
        let sample = b"AAAA".to_vec();
        let scores = table(&[(0, 1), (2, 0), (9, 1)]);

        let mutated = ThresholdRule.mutate("x", 0, &sample, &scores);

        assert_eq!(mutated.len(), 4);
        assert_eq!(mutated[2], b'A');
        assert_eq!(&mutated[1..], &sample[1..], "only byte 0 is eligible");
        assert_eq!(mutated, vec![0x8a, b'A', b'A', b'A']);
    }

    #[test]
    fn threshold_rule_leaves_sample_untouched() {
        let sample = vec![7u8; 16];
        let scores = table(&[(3, 5), (4, 5)]);
        let _ = ThresholdRule.mutate("seed", 11, &sample, &scores);
        assert_eq!(sample, vec![7u8; 16]);
    }

    #[test]
    fn threshold_rule_is_deterministic_per_seed_and_index() {
        let sample = vec![0u8; 64];
        let scores: ScoreTable = (0..64).map(|o| (o, 1)).collect();

        let a = ThresholdRule.mutate("session", 42, &sample, &scores);
        let b = ThresholdRule.mutate("session", 42, &sample, &scores);
        let other_index = ThresholdRule.mutate("session", 43, &sample, &scores);
        let other_seed = ThresholdRule.mutate("session2", 42, &sample, &scores);

        assert_eq!(a, b);
        assert_ne!(a, other_index);
        assert_ne!(a, other_seed);
    }

    #[test]
    fn threshold_rule_output_is_stable_across_runs() {
        let sample = vec![0u8; 4];
        let scores = table(&[(0, 1), (1, 1), (2, 1), (3, 1)]);
        assert_eq!(
            ThresholdRule.mutate("stable", 7, &sample, &scores),
            vec![0xcd, 0xc9, 0x46, 0xa4]
        );
    }

    #[test]
    fn iteration_key_is_sha256_of_seed_and_decimal_index() {
        let hex = |key: [u8; 32]| key.iter().map(|b| format!("{b:02x}")).collect::<String>();
        assert_eq!(
            hex(iteration_rng("stable", 7).get_seed()),
            "3b9519c04301ae143bdc4953687a9bd122a8c8f7171274d83a70389369dc8623"
        );
        assert_eq!(
            hex(iteration_rng("x", 0).get_seed()),
            "b70a14ee1e15d7aa94bd810ec06f4cb77a346e8f33aef6bfeae3d7c4442d7a93"
        );
    }

    #[test]
    fn closures_are_mutation_rules() {
        let invert = |_seed: &str, _index: u64, sample: &[u8], _scores: &ScoreTable| {
            sample.iter().map(|b| !b).collect::<Vec<u8>>()
        };
        let rule: Box<dyn MutationRule> = Box::new(invert);
        assert_eq!(rule.mutate("s", 0, &[0x0f], &ScoreTable::default()), vec![0xf0]);
    }

    #[test]
    fn weighted_rule_always_mutates_max_score_entries() {
        let sample = vec![0u8; 32];
        let scores: ScoreTable = (0..32).map(|o| (o, 9)).collect();
        let weighted = WeightedRule.mutate("w", 3, &sample, &scores);
        let mut rng = iteration_rng("w", 3);
        let expected: Vec<u8> = (0..32).map(|_| rng.random::<u8>()).collect();
        assert_eq!(weighted, expected);
    }

    #[test]
    fn weighted_rule_mutates_low_scores_less_often() {
        let sample = vec![0u8; 2];
        let scores = table(&[(0, 1000), (1, 1)]);
        let mut low_changes = 0;
        for index in 0..500 {
            let out = WeightedRule.mutate("w", index, &sample, &scores);
            if out[1] != 0 {
                low_changes += 1;
            }
        }
        assert!(low_changes < 20, "low-weight byte changed {low_changes} times");
    }

    #[test]
    fn rule_kind_parses_names() {
        assert_eq!("threshold".parse::<RuleKind>().unwrap(), RuleKind::Threshold);
        assert_eq!("weighted".parse::<RuleKind>().unwrap(), RuleKind::Weighted);
        assert!("random".parse::<RuleKind>().is_err());
    }

    proptest! {
        #[test]
        fn zero_scores_never_change_their_byte(
            sample in proptest::collection::vec(any::<u8>(), 1..64),
            offsets in proptest::collection::vec(0u32..80, 0..16),
            index in any::<u64>(),
        ) {
            let scores: ScoreTable = offsets.iter().map(|&o| (o, 0)).collect();
            for rule in [RuleKind::Threshold.build(), RuleKind::Weighted.build()] {
                let out = rule.mutate("p", index, &sample, &scores);
                prop_assert_eq!(&out, &sample);
            }
        }

        #[test]
        fn output_length_matches_sample(
            sample in proptest::collection::vec(any::<u8>(), 0..64),
            pairs in proptest::collection::vec((any::<u32>(), any::<u32>()), 0..32),
            index in any::<u64>(),
        ) {
            let scores: ScoreTable = pairs.into_iter().collect();
            prop_assert_eq!(ThresholdRule.mutate("p", index, &sample, &scores).len(), sample.len());
            prop_assert_eq!(WeightedRule.mutate("p", index, &sample, &scores).len(), sample.len());
        }
    }
}
