// src/matching/name.rs

use unicode_normalization::UnicodeNormalization;

/// Canonicalizes a free-text personal name for comparison.
///
/// Decomposes accented characters (NFKD) and drops everything that is not a
/// plain Latin letter, uppercases, and collapses whitespace runs. Total and
/// idempotent: any input yields a string of uppercase A–Z words separated by
/// single spaces, possibly empty.
pub fn normalize_name(name: &str) -> String {
    let ascii: String = name.nfkd().filter(char::is_ascii).collect();
    let letters: String = ascii
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_uppercase() || *c == ' ')
        .collect();
    letters.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Sequence-matcher ratio between two strings: twice the number of characters
/// in the longest common subsequence, divided by the sum of both lengths.
///
/// 1.0 iff the strings are identical, 0.0 iff they share no characters (or
/// either is empty), symmetric, and monotonic in shared-subsequence length.
pub fn sequence_ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let lcs = lcs_len(&a_chars, &b_chars);
    (2 * lcs) as f64 / (a_chars.len() + b_chars.len()) as f64
}

/// Whether `score` clears the acceptance `threshold`. Inclusive on the
/// boundary, applied uniformly on every lookup path.
pub fn accepts(score: f64, threshold: f64) -> bool {
    score >= threshold
}

// Two-row dynamic program; names are short so O(n*m) is fine.
fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_accents() {
        assert_eq!(normalize_name("José da Conceição"), "JOSE DA CONCEICAO");
        assert_eq!(normalize_name("MÜLLER Ção"), "MULLER CAO");
    }

    #[test]
    fn test_normalize_drops_punctuation_and_digits() {
        assert_eq!(normalize_name("Maria-Silva, 2a."), "MARIASILVA A");
        assert_eq!(normalize_name("  maria   da\tsilva  "), "MARIA DA SILVA");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for raw in ["José da Conceição", "  x  Y  z ", "", "123", "Ångström & Co"] {
            let once = normalize_name(raw);
            assert_eq!(normalize_name(&once), once);
        }
    }

    #[test]
    fn test_normalize_empty_and_garbage() {
        assert_eq!(normalize_name(""), "");
        assert_eq!(normalize_name("12345 .-;"), "");
    }

    #[test]
    fn test_ratio_identical_is_one() {
        assert_eq!(sequence_ratio("MARIA DA SILVA", "MARIA DA SILVA"), 1.0);
        assert_eq!(sequence_ratio("A", "A"), 1.0);
    }

    #[test]
    fn test_ratio_empty_is_zero() {
        assert_eq!(sequence_ratio("", "MARIA"), 0.0);
        assert_eq!(sequence_ratio("MARIA", ""), 0.0);
        assert_eq!(sequence_ratio("", ""), 0.0);
    }

    #[test]
    fn test_ratio_disjoint_is_zero() {
        assert_eq!(sequence_ratio("ABC", "XYZ"), 0.0);
    }

    #[test]
    fn test_ratio_is_symmetric() {
        let pairs = [("MARIA", "MARIO"), ("JOAO", "JOANA"), ("AB", "BA")];
        for (a, b) in pairs {
            assert_eq!(sequence_ratio(a, b), sequence_ratio(b, a));
        }
    }

    #[test]
    fn test_ratio_partial_overlap() {
        // LCS("AB","BA") = 1 -> 2*1/4
        assert_eq!(sequence_ratio("AB", "BA"), 0.5);
        // A shared prefix scores higher than a disjoint tail of equal length.
        assert!(sequence_ratio("MARIA SILVA", "MARIA SOUSA") > sequence_ratio("MARIA SILVA", "PEDRO HENRI"));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        assert!(accepts(0.7, 0.7));
        assert!(accepts(0.71, 0.7));
        assert!(!accepts(0.699, 0.7));
    }
}
