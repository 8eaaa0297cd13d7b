//! Character-level similarity ratios used for fuzzy matching.
//!
//! Two normalizations of the longest-common-subsequence length are exposed:
//!
//! * [`ratio`], `2*LCS / (|a| + |b|)`, the classic sequence-matcher ratio.
//!   Entity resolution compares normalized names with this.
//! * [`overlap_ratio`], `LCS / min(|a|, |b|)`, which rewards one string being
//!   contained in the other. Transcript stitching uses this to decide whether
//!   two cues near the same timestamp carry the same utterance.

/// Length of the longest common subsequence of two char sequences.
///
/// Classic two-row DP; `O(|a|·|b|)` time, `O(min)` extra space. Inputs here
/// are cue texts and entity names, so quadratic cost is immaterial.
pub fn lcs_len(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    // Iterate over the longer sequence, keep rows sized by the shorter one.
    let (outer, inner) = if a.len() >= b.len() { (&a, &b) } else { (&b, &a) };
    let mut prev = vec![0usize; inner.len() + 1];
    let mut curr = vec![0usize; inner.len() + 1];
    for oc in outer.iter() {
        for (j, ic) in inner.iter().enumerate() {
            curr[j + 1] = if oc == ic {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[inner.len()]
}

/// Sequence-matcher style ratio in `[0, 1]`: `2·LCS / (|a| + |b|)`.
///
/// Returns 1.0 when both strings are empty (they are identical), 0.0 when
/// exactly one is empty.
pub fn ratio(a: &str, b: &str) -> f64 {
    let la = a.chars().count();
    let lb = b.chars().count();
    if la == 0 && lb == 0 {
        return 1.0;
    }
    if la == 0 || lb == 0 {
        return 0.0;
    }
    2.0 * lcs_len(a, b) as f64 / (la + lb) as f64
}

/// Containment-friendly ratio in `[0, 1]`: `LCS / min(|a|, |b|)`.
///
/// Empty strings are never similar to anything, including each other; an
/// empty cue must not suppress a real one.
pub fn overlap_ratio(a: &str, b: &str) -> f64 {
    let la = a.chars().count();
    let lb = b.chars().count();
    if la == 0 || lb == 0 {
        return 0.0;
    }
    lcs_len(a, b) as f64 / la.min(lb) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lcs_basic() {
        assert_eq!(lcs_len("abcde", "ace"), 3);
        assert_eq!(lcs_len("", "ace"), 0);
        assert_eq!(lcs_len("same", "same"), 4);
    }

    #[test]
    fn ratio_bounds() {
        assert_eq!(ratio("", ""), 1.0);
        assert_eq!(ratio("abc", ""), 0.0);
        assert!((ratio("openai", "openai") - 1.0).abs() < f64::EPSILON);
        assert!(ratio("openai", "open ai") > 0.85);
        assert!(ratio("apple", "orange") < 0.5);
    }

    #[test]
    fn overlap_rewards_containment() {
        // A prefix fragment of a longer utterance scores 1.0.
        assert!((overlap_ratio("hello there", "hello there everyone") - 1.0).abs() < f64::EPSILON);
        assert_eq!(overlap_ratio("", ""), 0.0);
        assert_eq!(overlap_ratio("x", ""), 0.0);
    }
}
