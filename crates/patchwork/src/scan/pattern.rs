use std::fmt;

/// Errors for a malformed pattern
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    /// a pattern must contain at least one element
    #[error("pattern is empty")]
    Empty,
    /// hex patterns are made of 2 character tokens
    #[error("pattern has odd length {0}. tokens are 2 hex digits or ??")]
    OddLength(usize),
    /// a token that is neither hex nor `??`
    #[error("invalid pattern token {token:?} at {position}. tokens must be 2 of a-f, A-F, 0-9, or ??")]
    InvalidToken {
        /// the offending token
        token: String,
        /// index of the token within the pattern (in elements, not characters)
        position: usize,
    },
    /// wide elements must be a byte or -1
    #[error("invalid pattern element {element} at {position}. elements must be 0..=255 or -1")]
    InvalidElement {
        /// the offending element
        element: i16,
        /// index of the element
        position: usize,
    },
}

/// A byte pattern: literal bytes plus "don't care" positions
///
/// Immutable once built.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Pattern {
    pub(crate) data: Vec<u8>,
    // 0xFF for a literal byte, 0x00 for a wildcard
    pub(crate) mask: Vec<u8>,
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, r#"Pattern("{self}")"#)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }

            match byte {
                Some(byte) => write!(f, "{byte:02X}")?,
                None => f.write_str("??")?,
            }
        }

        Ok(())
    }
}

impl Pattern {
    /// Parse a hex pattern where `??` is a wildcard
    ///
    /// Whitespace between tokens is ignored, so both forms below are the same pattern
    ///
    /// ```rust
    /// # use patchwork::Pattern;
    /// let a = Pattern::new("8B45??A3").unwrap();
    /// let b = Pattern::new("8B 45 ?? A3").unwrap();
    /// assert_eq!(a, b);
    /// ```
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        let chars = pattern
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect::<Vec<_>>();

        if chars.is_empty() {
            return Err(PatternError::Empty);
        }

        if chars.len() % 2 != 0 {
            return Err(PatternError::OddLength(chars.len()));
        }

        let mut data = Vec::with_capacity(chars.len() / 2);
        let mut mask = Vec::with_capacity(chars.len() / 2);

        for (position, token) in chars.chunks_exact(2).enumerate() {
            match (token[0], token[1]) {
                ('?', '?') => {
                    data.push(0x00);
                    mask.push(0x00);
                }

                (hi, lo) => {
                    let (Some(hi), Some(lo)) = (hi.to_digit(16), lo.to_digit(16)) else {
                        return Err(PatternError::InvalidToken {
                            token: token.iter().collect(),
                            position,
                        });
                    };

                    data.push((hi << 4 | lo) as u8);
                    mask.push(0xFF);
                }
            }
        }

        Ok(Self { data, mask })
    }

    /// Build a pattern from wide elements, where `-1` is a wildcard
    pub fn from_wide(elements: &[i16]) -> Result<Self, PatternError> {
        let bytes = elements
            .iter()
            .enumerate()
            .map(|(position, &element)| match element {
                -1 => Ok(None),
                0..=0xFF => Ok(Some(element as u8)),
                _ => Err(PatternError::InvalidElement { element, position }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_masked(&bytes)
    }

    /// Build a pattern where `None` is a wildcard
    pub fn from_masked(bytes: &[Option<u8>]) -> Result<Self, PatternError> {
        if bytes.is_empty() {
            return Err(PatternError::Empty);
        }

        let (data, mask) = bytes
            .iter()
            .map(|byte| match byte {
                Some(byte) => (*byte, 0xFF),
                None => (0x00, 0x00),
            })
            .unzip();

        Ok(Self { data, mask })
    }

    /// Build a pattern matching exactly `data`
    pub fn from_data(data: &[u8]) -> Result<Self, PatternError> {
        if data.is_empty() {
            return Err(PatternError::Empty);
        }

        Ok(Self {
            data: data.to_vec(),
            mask: vec![0xFF; data.len()],
        })
    }

    /// Number of elements, wildcards included
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false; patterns cannot be empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The elements of the pattern, `None` for wildcards
    pub fn iter(&self) -> impl Iterator<Item = Option<u8>> + '_ {
        self.data
            .iter()
            .zip(&self.mask)
            .map(|(&byte, &mask)| (mask != 0x00).then_some(byte))
    }

    /// Index and value of the first literal byte, if the pattern has any
    pub(crate) fn anchor(&self) -> Option<(usize, u8)> {
        self.mask
            .iter()
            .position(|&m| m != 0x00)
            .map(|i| (i, self.data[i]))
    }

    /// Whether `bytes` starts with something matching this pattern
    pub fn matches(&self, bytes: &[u8]) -> bool {
        bytes.len() >= self.len()
            && self
                .data
                .iter()
                .zip(&self.mask)
                .zip(bytes)
                .all(|((&data, &mask), &byte)| mask == 0x00 || data == byte)
    }
}

impl TryFrom<&str> for Pattern {
    type Error = PatternError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&[i16]> for Pattern {
    type Error = PatternError;

    fn try_from(value: &[i16]) -> Result<Self, Self::Error> {
        Self::from_wide(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_with_wildcard() {
        let pattern = Pattern::new("90??C3").unwrap();
        assert_eq!(
            pattern.iter().collect::<Vec<_>>(),
            [Some(0x90), None, Some(0xC3)]
        );
    }

    #[test]
    fn test_odd_length_is_malformed() {
        assert_eq!(Pattern::new("9"), Err(PatternError::OddLength(1)));
        assert_eq!(Pattern::new("90 C"), Err(PatternError::OddLength(3)));
    }

    #[test]
    fn test_invalid_tokens_are_malformed() {
        assert!(matches!(
            Pattern::new("90?C"),
            Err(PatternError::InvalidToken { position: 1, .. })
        ));
        assert!(matches!(
            Pattern::new("zz"),
            Err(PatternError::InvalidToken { position: 0, .. })
        ));
        assert_eq!(Pattern::new("  "), Err(PatternError::Empty));
    }

    #[test]
    fn test_spaced_and_mixed_case() {
        let pattern = Pattern::new("8b 45 ?? A3").unwrap();
        assert_eq!(pattern.to_string(), "8B 45 ?? A3");
        assert_eq!(pattern, Pattern::new("8B45??a3").unwrap());
    }

    #[test]
    fn test_wide_elements() {
        let pattern = Pattern::from_wide(&[0x8D, 0x75, -1, 0xB8]).unwrap();
        assert_eq!(pattern, Pattern::new("8D 75 ?? B8").unwrap());

        assert_eq!(
            Pattern::from_wide(&[0x90, 0x100]),
            Err(PatternError::InvalidElement {
                element: 0x100,
                position: 1
            })
        );
        assert_eq!(
            Pattern::from_wide(&[-2]),
            Err(PatternError::InvalidElement {
                element: -2,
                position: 0
            })
        );
        assert_eq!(Pattern::from_wide(&[]), Err(PatternError::Empty));
    }

    #[test]
    fn test_anchor_skips_leading_wildcards() {
        assert_eq!(Pattern::new("?? ?? 33").unwrap().anchor(), Some((2, 0x33)));
        assert_eq!(Pattern::new("?? ??").unwrap().anchor(), None);
    }

    #[test]
    fn test_matches_ignores_wildcard_bytes() {
        let pattern = Pattern::new("11 ?? 33").unwrap();

        for b in 0..=255 {
            assert!(pattern.matches(&[0x11, b, 0x33]));
        }

        assert!(!pattern.matches(&[0x11, 0x22, 0x34]));
        assert!(!pattern.matches(&[0x11, 0x22]));
    }
}
