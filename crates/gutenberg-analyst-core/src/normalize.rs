//! Content normalizer.
//!
//! Book texts are bounded to a fixed byte ceiling before they are stored or
//! sent for analysis. Oversized text is truncated, not rejected: the cut is
//! placed at the largest UTF-8 char boundary that does not exceed the bound,
//! so the same input always yields the same output and no multi-byte
//! sequence is ever split.
//!
//! # Guarantees
//!
//! - `normalize(t)` is a prefix of `t`.
//! - `normalize(t) == t` whenever `t.len() <= bound`.
//! - `bound - 3 <= normalize(t).len() <= bound` whenever `t.len() > bound`
//!   (exactly `bound` for ASCII text).
//! - `normalize(normalize(t)) == normalize(t)`.
//!
//! # Example
//!
//! ```rust
//! use gutenberg_analyst_core::normalize::ContentBound;
//!
//! let bound = ContentBound::new(5);
//! assert_eq!(bound.normalize("Hamlet"), "Hamle");
//! assert_eq!(bound.normalize("Lear"), "Lear");
//! ```

/// Default content ceiling in bytes (7.5 MB).
pub const DEFAULT_MAX_BYTES: usize = 7_500_000;

/// A byte-size ceiling applied to stored and analyzed text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentBound(usize);

impl ContentBound {
    pub const fn new(max_bytes: usize) -> Self {
        Self(max_bytes)
    }

    pub const fn max_bytes(&self) -> usize {
        self.0
    }

    /// Whether `text` would be truncated by this bound.
    pub fn exceeded_by(&self, text: &str) -> bool {
        text.len() > self.0
    }

    /// Truncate `text` to this bound. See [`normalize`].
    pub fn normalize<'a>(&self, text: &'a str) -> &'a str {
        normalize(text, *self)
    }
}

impl Default for ContentBound {
    fn default() -> Self {
        Self(DEFAULT_MAX_BYTES)
    }
}

/// Truncate `text` to at most `bound` bytes on a char boundary.
pub fn normalize(text: &str, bound: ContentBound) -> &str {
    let cut = snap_to_char_boundary(text, bound.max_bytes());
    &text[..cut]
}

/// Prefix of `text` holding at most `max_chars` characters.
///
/// Used to build provider prompts from the head of a book.
pub fn sample(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_unchanged() {
        let bound = ContentBound::new(64);
        let text = "It was the best of times, it was the worst of times.";
        assert_eq!(bound.normalize(text), text);
    }

    #[test]
    fn test_exact_bound_unchanged() {
        let bound = ContentBound::new(4);
        assert_eq!(bound.normalize("abcd"), "abcd");
        assert!(!bound.exceeded_by("abcd"));
    }

    #[test]
    fn test_empty_text() {
        assert_eq!(ContentBound::default().normalize(""), "");
        assert_eq!(ContentBound::new(0).normalize(""), "");
    }

    #[test]
    fn test_ascii_truncated_to_exact_bound() {
        let text = "a".repeat(1000);
        let bound = ContentBound::new(100);
        let out = bound.normalize(&text);
        assert_eq!(out.len(), 100);
        assert!(text.starts_with(out));
        assert!(bound.exceeded_by(&text));
    }

    #[test]
    fn test_multibyte_never_split() {
        // "é" is two bytes, "€" three, "𝄞" four.
        let text = "é€𝄞".repeat(50);
        for max in 0..text.len() {
            let bound = ContentBound::new(max);
            let out = bound.normalize(&text);
            assert!(out.len() <= max);
            assert!(out.len() + 3 >= max, "cut too early at bound {}", max);
            assert!(text.starts_with(out));
            assert!(text.is_char_boundary(out.len()));
        }
    }

    #[test]
    fn test_idempotent() {
        let text = "Ünïcödé text — with dashes and ∑ symbols ".repeat(20);
        let bound = ContentBound::new(77);
        let once = bound.normalize(&text);
        let twice = bound.normalize(once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_deterministic() {
        let text = "Call me Ishmael. ".repeat(100);
        let bound = ContentBound::new(333);
        assert_eq!(bound.normalize(&text), bound.normalize(&text));
    }

    #[test]
    fn test_default_bound() {
        assert_eq!(ContentBound::default().max_bytes(), 7_500_000);
    }

    #[test]
    fn test_sample_counts_chars() {
        assert_eq!(sample("añb", 2), "añ");
        assert_eq!(sample("abc", 10), "abc");
        assert_eq!(sample("abc", 0), "");
    }
}
