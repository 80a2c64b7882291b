//! Single-splice text diff biased towards the caret.
//!
//! Typing "l" after the second "l" of "Hello" could be reported as an insert at
//! byte 2, 3 or 4. Remote peers see the difference: their cursors and any
//! concurrent edits stick to whichever characters the splice claims are new.
//! The diff therefore stops its first forward scan at the caret, so the
//! inserted character is the one the user actually typed.

/// One contiguous replacement. Offsets are UTF-8 byte offsets on char
/// boundaries of the previous string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextDiff {
    /// Where the replacement starts.
    pub index: usize,
    /// Bytes removed at `index`.
    pub remove: usize,
    /// Text inserted at `index`.
    pub insert: String,
}

impl TextDiff {
    /// Diff `prev` into `next`. `cursor` is the caret's byte offset in `next`;
    /// `None` means the end of `next`.
    pub fn compute(prev: &str, next: &str, cursor: Option<usize>) -> Self {
        let a: Vec<(usize, char)> = prev.char_indices().collect();
        let b: Vec<(usize, char)> = next.char_indices().collect();
        let cursor = match cursor {
            Some(offset) => b.iter().take_while(|(i, _)| *i < offset).count(),
            None => b.len(),
        };

        let mut left = 0;
        while left < a.len() && left < b.len() && a[left].1 == b[left].1 && left < cursor {
            left += 1;
        }
        let mut right = 0;
        while right + left < a.len()
            && right + left < b.len()
            && a[a.len() - right - 1].1 == b[b.len() - right - 1].1
        {
            right += 1;
        }
        while right + left < a.len() && right + left < b.len() && a[left].1 == b[left].1 {
            left += 1;
        }

        let byte_at = |chars: &[(usize, char)], total: usize, i: usize| {
            chars.get(i).map(|(offset, _)| *offset).unwrap_or(total)
        };
        let index = byte_at(&a, prev.len(), left);
        let remove_end = byte_at(&a, prev.len(), a.len() - right);
        let insert_start = byte_at(&b, next.len(), left);
        let insert_end = byte_at(&b, next.len(), b.len() - right);

        Self {
            index,
            remove: remove_end - index,
            insert: next[insert_start..insert_end].to_string(),
        }
    }

    /// Whether applying the diff would change nothing.
    pub fn is_empty(&self) -> bool {
        self.remove == 0 && self.insert.is_empty()
    }

    /// Apply to `text`, which must be the string the diff was computed from.
    pub fn apply(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len() + self.insert.len());
        out.push_str(&text[..self.index]);
        out.push_str(&self.insert);
        out.push_str(&text[self.index + self.remove..]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff(index: usize, remove: usize, insert: &str) -> TextDiff {
        TextDiff {
            index,
            remove,
            insert: insert.to_string(),
        }
    }

    #[test]
    fn test_insert_follows_cursor() {
        assert_eq!(TextDiff::compute("Hello", "Helllo", Some(4)), diff(4, 0, "l"));
        assert_eq!(TextDiff::compute("Hello", "Helllo", Some(3)), diff(3, 0, "l"));
        assert_eq!(TextDiff::compute("Hello", "Helllo", None), diff(4, 0, "l"));
    }

    #[test]
    fn test_repeated_characters() {
        assert_eq!(TextDiff::compute("aaa", "aaaa", Some(1)), diff(1, 0, "a"));
        assert_eq!(TextDiff::compute("aaa", "aaaa", None), diff(3, 0, "a"));
        assert_eq!(TextDiff::compute("aaaa", "aaa", Some(0)), diff(0, 1, ""));
    }

    #[test]
    fn test_replace_and_delete() {
        assert_eq!(TextDiff::compute("Hello", "Help", None), diff(3, 2, "p"));
        assert_eq!(TextDiff::compute("Hello", "", None), diff(0, 5, ""));
        assert_eq!(TextDiff::compute("", "Hi", None), diff(0, 0, "Hi"));
        assert!(TextDiff::compute("same", "same", Some(2)).is_empty());
    }

    #[test]
    fn test_multibyte_offsets_are_bytes() {
        let d = TextDiff::compute("héllo", "héllö", None);
        assert_eq!(d, diff(5, 1, "ö"));
        assert_eq!(d.apply("héllo"), "héllö");

        let d = TextDiff::compute("日本", "日日本", Some(3));
        assert_eq!(d, diff(3, 0, "日"));
        assert_eq!(d.apply("日本"), "日日本");
    }

    #[test]
    fn test_apply_round_trips() {
        for (a, b, c) in [
            ("The quick fox", "The quick brown fox", Some(16)),
            ("abc", "xbc", Some(1)),
            ("emoji 🎉!", "emoji !", Some(6)),
        ] {
            assert_eq!(TextDiff::compute(a, b, c).apply(a), b);
        }
    }
}
