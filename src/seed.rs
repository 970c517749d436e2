use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{Result, TextGenError};

/// Seed lengths tried by default.
pub const DEFAULT_SEED_LENGTHS: [usize; 5] = [2, 4, 8, 16, 32];

/// Picks a random substring of `text` to prime generation.
///
/// The length is drawn uniformly from the candidates that fit (a candidate
/// `n` fits when `text` has at least `n + 1` characters), then the start
/// offset uniformly from `0..=len - n - 1`. Works on characters, not bytes.
///
/// # Errors
/// `Range` if `text` is shorter than the smallest candidate plus one, or
/// if no candidates are given.
pub fn generate_seed<R: Rng>(rng: &mut R, text: &str, candidate_lengths: &[usize]) -> Result<String> {
    let text_len = text.chars().count();
    let fitting: Vec<usize> = candidate_lengths
        .iter()
        .copied()
        .filter(|&n| n > 0 && n < text_len)
        .collect();

    let seq_len = *fitting.choose(rng).ok_or_else(|| {
        TextGenError::Range(format!(
            "text of {} characters is too short for any seed length in {:?}",
            text_len, candidate_lengths
        ))
    })?;
    let start = rng.gen_range(0..text_len - seq_len);
    Ok(text.chars().skip(start).take(seq_len).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn seed_is_a_substring_of_a_candidate_length() {
        let mut rng = StdRng::seed_from_u64(7);
        let text = "the quick brown fox jumps over the lazy dog, again and again and again";
        for _ in 0..200 {
            let seed = generate_seed(&mut rng, text, &DEFAULT_SEED_LENGTHS).unwrap();
            assert!(DEFAULT_SEED_LENGTHS.contains(&seed.chars().count()));
            assert!(text.contains(&seed));
        }
    }

    #[test]
    fn last_character_is_never_part_of_a_seed_end() {
        // start <= len - n - 1, so the final character can never be the seed's end.
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            let seed = generate_seed(&mut rng, "abcZ", &[2]).unwrap();
            assert!(seed == "ab" || seed == "bc");
        }
    }

    #[test]
    fn long_candidates_are_skipped_for_short_text() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..50 {
            let seed = generate_seed(&mut rng, "hello", &DEFAULT_SEED_LENGTHS).unwrap();
            assert!(matches!(seed.len(), 2 | 4));
        }
    }

    #[test]
    fn too_short_text_is_a_range_error() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(generate_seed(&mut rng, "ab", &[2, 4]), Err(TextGenError::Range(_))));
        assert!(matches!(generate_seed(&mut rng, "abcdef", &[]), Err(TextGenError::Range(_))));
    }

    #[test]
    fn handles_multibyte_text() {
        let mut rng = StdRng::seed_from_u64(5);
        let seed = generate_seed(&mut rng, "héllo wörld", &[4]).unwrap();
        assert_eq!(seed.chars().count(), 4);
    }
}
