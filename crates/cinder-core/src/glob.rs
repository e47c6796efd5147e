//! Redis-style glob matching for key patterns.
//!
//! Supports `*`, `?`, `[abc]`, `[a-z]`, `[^abc]` and `\x` escapes.
//! Matching is byte-wise; all metacharacters are ASCII so that is
//! unambiguous for UTF-8 keys.

/// Returns true if `input` matches `pattern`.
pub fn glob_match(pattern: &str, input: &str) -> bool {
    matches_bytes(pattern.as_bytes(), input.as_bytes())
}

/// Backtracking matcher. Remembers the most recent `*` in both the pattern
/// and the input; on a mismatch the star swallows one more input byte and
/// matching resumes from just after it.
fn matches_bytes(pat: &[u8], inp: &[u8]) -> bool {
    let (mut p, mut i) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while i < inp.len() {
        let step = match pat.get(p) {
            Some(b'*') => {
                star = Some((p, i));
                p += 1;
                continue;
            }
            Some(b'?') => Some(1),
            Some(b'\\') if p + 1 < pat.len() => (pat[p + 1] == inp[i]).then_some(2),
            Some(b'[') => match class_match(&pat[p..], inp[i]) {
                Some((true, width)) => Some(width),
                _ => None,
            },
            Some(&c) => (c == inp[i]).then_some(1),
            None => None,
        };

        match step {
            Some(width) => {
                p += width;
                i += 1;
            }
            None => match star {
                Some((sp, si)) => {
                    p = sp + 1;
                    i = si + 1;
                    star = Some((sp, si + 1));
                }
                None => return false,
            },
        }
    }

    pat[p..].iter().all(|&c| c == b'*')
}

/// Matches a `[...]` class at the start of `pat` against `ch`.
/// Returns `(matched, class_width)`, or `None` for an unterminated class.
fn class_match(pat: &[u8], ch: u8) -> Option<(bool, usize)> {
    let mut i = 1;
    let negate = pat.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < pat.len() && pat[i] != b']' {
        if i + 2 < pat.len() && pat[i + 1] == b'-' && pat[i + 2] != b']' {
            matched |= (pat[i]..=pat[i + 2]).contains(&ch);
            i += 3;
        } else {
            matched |= pat[i] == ch;
            i += 1;
        }
    }

    (i < pat.len()).then_some((matched ^ negate, i + 1))
}
