use crate::partition::PartitionError;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Digits followed by lowercase ASCII letters.
pub const DEFAULT_ALPHABET: &str = "0123456789abcdefghijklmnopqrstuvwxyz";

/// Symbol preference used by [`EnumerationOrder::FrequencyBiased`] when no
/// explicit ranking is configured: digits led by `1`, then English letter
/// frequency.
pub const DEFAULT_FREQUENCY_RANKING: &str = "1234567890etaoinsrhldcumfpgwybvkxjqz";

fn default_ranking() -> String {
    DEFAULT_FREQUENCY_RANKING.to_string()
}

/// An ordered set of distinct symbols that candidates are built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alphabet {
    symbols: Vec<char>,
}

impl Alphabet {
    /// Builds an alphabet from the characters of `symbols`, keeping their order.
    ///
    /// # Errors
    /// [`PartitionError::EmptyAlphabet`] for an empty string and
    /// [`PartitionError::DuplicateSymbol`] if a character repeats.
    pub fn new(symbols: &str) -> Result<Self, PartitionError> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for c in symbols.chars() {
            if !seen.insert(c) {
                return Err(PartitionError::DuplicateSymbol(c));
            }
            out.push(c);
        }
        if out.is_empty() {
            return Err(PartitionError::EmptyAlphabet);
        }
        Ok(Self { symbols: out })
    }

    pub fn arity(&self) -> usize {
        self.symbols.len()
    }

    pub fn symbols(&self) -> &[char] {
        &self.symbols
    }

    pub fn contains(&self, symbol: char) -> bool {
        self.symbols.contains(&symbol)
    }
}

impl Default for Alphabet {
    fn default() -> Self {
        Self {
            symbols: DEFAULT_ALPHABET.chars().collect(),
        }
    }
}

impl fmt::Display for Alphabet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.symbols.iter().try_for_each(|c| write!(f, "{c}"))
    }
}

/// A candidate secret of fixed length over an [`Alphabet`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Candidate(String);

impl Candidate {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for Candidate {
    fn from(value: String) -> Self {
        Candidate(value)
    }
}

impl From<&str> for Candidate {
    fn from(value: &str) -> Self {
        Candidate(value.to_string())
    }
}

impl AsRef<str> for Candidate {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How alphabet symbols are ranked before mixed-radix decoding.
///
/// Every variant is a relabelling of symbol ranks, so each one keeps the
/// index/candidate bijection and works with the same partitioning.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnumerationOrder {
    /// Symbols ranked in alphabet order; index order is lexicographic order.
    #[default]
    Lexicographic,
    /// Symbols listed in `ranking` come first, in that order; the rest of the
    /// alphabet follows in its own order. Ranking symbols outside the alphabet
    /// and repeated ranking symbols are ignored.
    FrequencyBiased {
        #[serde(default = "default_ranking")]
        ranking: String,
    },
    /// A fixed pseudo-random permutation of the alphabet.
    Shuffled { seed: u64 },
}

impl EnumerationOrder {
    pub fn frequency_biased() -> Self {
        EnumerationOrder::FrequencyBiased {
            ranking: default_ranking(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EnumerationOrder::Lexicographic => "lexicographic",
            EnumerationOrder::FrequencyBiased { .. } => "frequency-biased",
            EnumerationOrder::Shuffled { .. } => "shuffled",
        }
    }

    /// Returns the alphabet's symbols in rank order.
    fn rank_symbols(&self, alphabet: &Alphabet) -> Vec<char> {
        match self {
            EnumerationOrder::Lexicographic => alphabet.symbols().to_vec(),
            EnumerationOrder::FrequencyBiased { ranking } => {
                let mut ranked = Vec::with_capacity(alphabet.arity());
                for c in ranking.chars() {
                    if alphabet.contains(c) && !ranked.contains(&c) {
                        ranked.push(c);
                    }
                }
                for &c in alphabet.symbols() {
                    if !ranked.contains(&c) {
                        ranked.push(c);
                    }
                }
                ranked
            }
            EnumerationOrder::Shuffled { seed } => {
                let mut ranked = alphabet.symbols().to_vec();
                let mut rng = ChaCha8Rng::seed_from_u64(*seed);
                ranked.shuffle(&mut rng);
                ranked
            }
        }
    }
}

impl fmt::Display for EnumerationOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Maps indices in `[0, N)` to candidates and back, where `N = arity^length`.
///
/// Decoding is mixed-radix with the most significant symbol first, so under
/// [`EnumerationOrder::Lexicographic`] index order matches string order.
#[derive(Debug, Clone)]
pub struct CandidateEnumerator {
    symbols: Vec<char>,
    ranks: HashMap<char, u64>,
    length: u32,
    keyspace: u64,
    /// Largest place value, `arity^(length - 1)`.
    top_place: u64,
    max_symbol_bytes: usize,
}

impl CandidateEnumerator {
    /// # Errors
    /// [`PartitionError::ZeroLength`] for `length == 0` and
    /// [`PartitionError::KeyspaceOverflow`] if `arity^length` exceeds `u64`.
    pub fn new(
        alphabet: &Alphabet,
        length: u32,
        order: &EnumerationOrder,
    ) -> Result<Self, PartitionError> {
        if length == 0 {
            return Err(PartitionError::ZeroLength);
        }
        let arity = alphabet.arity();
        let keyspace = (arity as u64)
            .checked_pow(length)
            .ok_or(PartitionError::KeyspaceOverflow { arity, length })?;

        let symbols = order.rank_symbols(alphabet);
        let ranks = symbols
            .iter()
            .enumerate()
            .map(|(rank, &c)| (c, rank as u64))
            .collect();
        let max_symbol_bytes = symbols.iter().map(|c| c.len_utf8()).max().unwrap_or(1);

        Ok(Self {
            top_place: keyspace / arity as u64,
            symbols,
            ranks,
            length,
            keyspace,
            max_symbol_bytes,
        })
    }

    /// Total number of candidates.
    pub fn keyspace(&self) -> u64 {
        self.keyspace
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    /// Symbols in rank order: `symbols()[r]` is the digit value `r`.
    pub fn symbols(&self) -> &[char] {
        &self.symbols
    }

    /// A buffer large enough to hold any candidate without reallocating.
    pub fn candidate_buffer(&self) -> String {
        String::with_capacity(self.length as usize * self.max_symbol_bytes)
    }

    /// Decodes `index` into a fresh [`Candidate`].
    ///
    /// # Panics
    /// Panics if `index >= self.keyspace()`.
    pub fn decode(&self, index: u64) -> Candidate {
        let mut buf = self.candidate_buffer();
        self.decode_into(index, &mut buf);
        Candidate(buf)
    }

    /// Like [`decode`](Self::decode) but returns `None` for out-of-range indices.
    pub fn try_decode(&self, index: u64) -> Option<Candidate> {
        (index < self.keyspace).then(|| self.decode(index))
    }

    /// Writes the candidate for `index` into `buf`, replacing its contents.
    ///
    /// Runs in O(length) and does not allocate once `buf` has grown to
    /// candidate size.
    ///
    /// # Panics
    /// Panics if `index >= self.keyspace()`.
    pub fn decode_into(&self, index: u64, buf: &mut String) {
        assert!(
            index < self.keyspace,
            "Candidate index {index} is outside the keyspace of {} candidates",
            self.keyspace
        );
        buf.clear();
        let arity = self.symbols.len() as u64;
        let mut place = self.top_place;
        let mut rest = index;
        for _ in 0..self.length {
            let digit = rest / place;
            rest %= place;
            buf.push(self.symbols[digit as usize]);
            place /= arity;
        }
    }

    /// Returns the index of `candidate`, or `None` if it has the wrong length
    /// or contains a symbol outside the alphabet.
    pub fn encode(&self, candidate: &str) -> Option<u64> {
        let arity = self.symbols.len() as u64;
        let mut index = 0u64;
        let mut seen = 0u32;
        for c in candidate.chars() {
            seen += 1;
            if seen > self.length {
                return None;
            }
            index = index * arity + *self.ranks.get(&c)?;
        }
        (seen == self.length).then_some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn enumerator(alphabet: &str, length: u32, order: EnumerationOrder) -> CandidateEnumerator {
        let alphabet = Alphabet::new(alphabet).expect("Alphabet should be valid");
        CandidateEnumerator::new(&alphabet, length, &order).expect("Enumerator should build")
    }

    fn assert_full_bijection(order: EnumerationOrder) {
        let e = enumerator(DEFAULT_ALPHABET, 4, order);
        assert_eq!(e.keyspace(), 36u64.pow(4));
        let mut buf = e.candidate_buffer();
        for i in 0..e.keyspace() {
            e.decode_into(i, &mut buf);
            assert_eq!(
                e.encode(&buf),
                Some(i),
                "encode(decode({i})) should round-trip, decoded {buf:?}"
            );
        }
    }

    #[test]
    fn lexicographic_bijection_over_full_keyspace() {
        assert_full_bijection(EnumerationOrder::Lexicographic);
    }

    #[test]
    fn frequency_biased_bijection_over_full_keyspace() {
        assert_full_bijection(EnumerationOrder::frequency_biased());
    }

    #[test]
    fn shuffled_bijection_over_full_keyspace() {
        assert_full_bijection(EnumerationOrder::Shuffled { seed: 7 });
    }

    #[test]
    fn lexicographic_decode_is_most_significant_first() {
        let e = enumerator("01", 4, EnumerationOrder::Lexicographic);
        assert_eq!(e.decode(9).as_str(), "1001");
        assert_eq!(e.decode(0).as_str(), "0000");
        assert_eq!(e.decode(15).as_str(), "1111");
        let e = enumerator(DEFAULT_ALPHABET, 6, EnumerationOrder::Lexicographic);
        assert_eq!(e.decode(36).as_str(), "000010");
        assert_eq!(e.decode(e.keyspace() - 1).as_str(), "zzzzzz");
    }

    #[test]
    fn frequency_biased_relabels_ranks() {
        let e = enumerator(DEFAULT_ALPHABET, 2, EnumerationOrder::frequency_biased());
        assert_eq!(e.symbols()[0], '1', "Highest ranked symbol should be '1'");
        assert_eq!(e.decode(0).as_str(), "11");
        assert_eq!(e.decode(1).as_str(), "12");
        assert_eq!(e.symbols().len(), 36, "Ranking must stay a permutation of the alphabet");
    }

    #[test]
    fn frequency_ranking_ignores_foreign_and_repeated_symbols() {
        let e = enumerator(
            "abc",
            1,
            EnumerationOrder::FrequencyBiased {
                ranking: "zcxcb".to_string(),
            },
        );
        assert_eq!(e.symbols(), &['c', 'b', 'a']);
    }

    #[test]
    fn shuffled_order_is_deterministic_per_seed() {
        let a = enumerator(DEFAULT_ALPHABET, 1, EnumerationOrder::Shuffled { seed: 42 });
        let b = enumerator(DEFAULT_ALPHABET, 1, EnumerationOrder::Shuffled { seed: 42 });
        assert_eq!(a.symbols(), b.symbols(), "Same seed should produce the same permutation");
        let mut sorted = a.symbols().to_vec();
        sorted.sort_unstable();
        let mut expected: Vec<char> = DEFAULT_ALPHABET.chars().collect();
        expected.sort_unstable();
        assert_eq!(sorted, expected, "Shuffled ranks must be a permutation of the alphabet");
    }

    #[test]
    fn single_symbol_alphabet_has_one_candidate() {
        let e = enumerator("x", 5, EnumerationOrder::Lexicographic);
        assert_eq!(e.keyspace(), 1);
        assert_eq!(e.decode(0).as_str(), "xxxxx");
        assert_eq!(e.encode("xxxxx"), Some(0));
    }

    #[test]
    fn encode_rejects_foreign_symbols_and_wrong_lengths() {
        let e = enumerator("01", 4, EnumerationOrder::Lexicographic);
        assert_eq!(e.encode("10"), None);
        assert_eq!(e.encode("100100"), None);
        assert_eq!(e.encode("10a1"), None);
    }

    #[test]
    fn try_decode_rejects_out_of_range() {
        let e = enumerator("01", 4, EnumerationOrder::Lexicographic);
        assert!(e.try_decode(16).is_none());
        assert_eq!(e.try_decode(3).map(Candidate::into_string), Some("0011".to_string()));
    }

    #[test]
    #[should_panic(expected = "outside the keyspace")]
    fn decode_past_keyspace_panics() {
        let e = enumerator("01", 4, EnumerationOrder::Lexicographic);
        let _ = e.decode(16);
    }

    #[test]
    fn construction_rejects_invalid_parameters() {
        assert_eq!(Alphabet::new(""), Err(PartitionError::EmptyAlphabet));
        assert_eq!(Alphabet::new("abca"), Err(PartitionError::DuplicateSymbol('a')));
        let alphabet = Alphabet::default();
        assert_eq!(
            CandidateEnumerator::new(&alphabet, 0, &EnumerationOrder::Lexicographic).err(),
            Some(PartitionError::ZeroLength)
        );
        assert_eq!(
            CandidateEnumerator::new(&alphabet, 13, &EnumerationOrder::Lexicographic).err(),
            Some(PartitionError::KeyspaceOverflow { arity: 36, length: 13 })
        );
    }

    #[test]
    fn multibyte_symbols_round_trip() {
        let e = enumerator("aé→", 3, EnumerationOrder::Lexicographic);
        let c = e.decode(26);
        assert_eq!(c.as_str(), "→→→");
        assert_eq!(e.encode(c.as_str()), Some(26));
    }

    proptest! {
        #[test]
        fn decode_encode_round_trips_at_length_six(index in 0u64..36u64.pow(6), seed in any::<u64>()) {
            for order in [
                EnumerationOrder::Lexicographic,
                EnumerationOrder::frequency_biased(),
                EnumerationOrder::Shuffled { seed },
            ] {
                let e = enumerator(DEFAULT_ALPHABET, 6, order);
                let candidate = e.decode(index);
                prop_assert_eq!(candidate.as_str().chars().count(), 6);
                prop_assert_eq!(e.encode(candidate.as_str()), Some(index));
            }
        }
    }
}
