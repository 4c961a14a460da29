//! Scalar pattern scanning backend

use memchr::memchr_iter;

use super::Pattern;

/// Find the offset of the `occurrence`th (0-indexed) match of `pattern` in `haystack`
///
/// Candidate offsets are visited in ascending order, and each comparison stops at the
/// first mismatching literal byte. When the pattern has a literal byte, candidates are
/// picked by searching for that byte instead of stepping one offset at a time.
pub(crate) fn find(haystack: &[u8], pattern: &Pattern, occurrence: usize) -> Option<usize> {
    let last_start = haystack.len().checked_sub(pattern.len())?;

    let Some((anchor, anchor_byte)) = pattern.anchor() else {
        // all wildcards, every offset qualifies
        return (occurrence <= last_start).then_some(occurrence);
    };

    // the anchor byte of a candidate starting at `start` sits at `start + anchor`
    let window = &haystack[anchor..=last_start + anchor];

    memchr_iter(anchor_byte, window)
        .filter(|&start| pattern.matches(&haystack[start..]))
        .nth(occurrence)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive(haystack: &[u8], pattern: &Pattern) -> Vec<usize> {
        (0..haystack.len())
            .filter(|&i| pattern.matches(&haystack[i..]))
            .collect()
    }

    #[test]
    fn test_agrees_with_naive_scan() {
        let haystack = (0..2048u32)
            .map(|i| (i.wrapping_mul(2_654_435_761) >> 7) as u8 & 0x0F)
            .collect::<Vec<_>>();

        for text in ["01 02", "?? 03 ?? 04", "0F", "01 ?? ?? ?? 01", "?? ??"] {
            let pattern = Pattern::new(text).unwrap();
            let expected = naive(&haystack, &pattern);

            for (n, offset) in expected.iter().enumerate() {
                assert_eq!(find(&haystack, &pattern, n), Some(*offset), "{text} #{n}");
            }

            assert_eq!(find(&haystack, &pattern, expected.len()), None, "{text}");
        }
    }

    #[test]
    fn test_match_at_very_end() {
        let pattern = Pattern::new("?? BB").unwrap();
        assert_eq!(find(&[0x00, 0xAA, 0xBB], &pattern, 0), Some(1));
    }

    #[test]
    fn test_pattern_longer_than_haystack() {
        let pattern = Pattern::new("AA BB CC").unwrap();
        assert_eq!(find(&[0xAA, 0xBB], &pattern, 0), None);
    }
}
