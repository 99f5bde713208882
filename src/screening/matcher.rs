//! Longest-matching-blocks similarity ratio
//!
//! The longest common contiguous block of the two strings is taken, then the
//! same search runs on the pieces left and right of it, recursively. With `M`
//! the total length of all blocks and `T` the combined length of both
//! strings, the ratio is `2M / T`.

/// Similarity of `a` and `b` in `[0, 1]`, counted in chars.
///
/// Two empty strings are identical (1.0).
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }

    let matched = matching_chars(&a, &b);
    2.0 * matched as f64 / total as f64
}

/// Sum of the lengths of all matching blocks.
fn matching_chars(a: &[char], b: &[char]) -> usize {
    let mut matched = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];

    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, k) = longest_match(a, b, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        matched += k;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            pending.push((i + k, ahi, j + k, bhi));
        }
    }

    matched
}

/// Longest block `a[i..i+k] == b[j..j+k]` within the given ranges.
///
/// Among equally long blocks the one starting earliest in `a` wins, then the
/// one starting earliest in `b`.
fn longest_match(
    a: &[char],
    b: &[char],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_k) = (alo, blo, 0);

    // run[j] is the length of the block ending at a[i-1], b[j-1]
    let width = bhi - blo;
    let mut prev = vec![0usize; width + 1];
    let mut curr = vec![0usize; width + 1];

    for i in alo..ahi {
        for j in blo..bhi {
            let col = j - blo + 1;
            curr[col] = if a[i] == b[j] { prev[col - 1] + 1 } else { 0 };

            let k = curr[col];
            if k == 0 {
                continue;
            }
            let (start_i, start_j) = (i + 1 - k, j + 1 - k);
            if k > best_k || (k == best_k && (start_i, start_j) < (best_i, best_j)) {
                best_i = start_i;
                best_j = start_j;
                best_k = k;
            }
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    (best_i, best_j, best_k)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_identical_strings() {
        assert!(approx(similarity_ratio("acme gmbh", "acme gmbh"), 1.0));
    }

    #[test]
    fn test_disjoint_strings() {
        assert!(approx(similarity_ratio("abc", "xyz"), 0.0));
    }

    #[test]
    fn test_empty_strings() {
        assert!(approx(similarity_ratio("", ""), 1.0));
        assert!(approx(similarity_ratio("abc", ""), 0.0));
    }

    #[test]
    fn test_misspelled_name() {
        // "vlad" + "mir putin" = 13 matched chars over 27
        let ratio = similarity_ratio("vladmir putin", "vladimir putin");
        assert!(approx(ratio, 26.0 / 27.0));
    }

    #[test]
    fn test_known_ratios() {
        // abcd / bcde share "bcd"
        assert!(approx(similarity_ratio("abcd", "bcde"), 0.75));
        // "a" then "c" after the "b" split
        assert!(approx(similarity_ratio("abc", "acb"), 2.0 * 2.0 / 6.0));
    }

    #[test]
    fn test_counts_chars_not_bytes() {
        assert!(approx(similarity_ratio("zoë", "zoe"), 2.0 * 2.0 / 6.0));
    }

    #[test]
    fn test_tie_prefers_earliest_block() {
        assert_eq!(
            longest_match(&['a', 'b'], &['b', 'a'], 0, 2, 0, 2),
            (0, 1, 1)
        );
    }
}
