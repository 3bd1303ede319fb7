use std::fmt;

/// We use that as a way to convey which anchors should be active in regexes.
/// We don't want to enable \A or \G everywhere, it's context dependent.
#[derive(Copy, Clone, PartialEq, Hash, Eq)]
pub(crate) enum AnchorActive {
    /// Only \A is active
    A,
    /// Only \G is active
    G,
    /// Both \A and \G are active
    AG,
    /// Neither \A nor \G are active
    None,
}

impl AnchorActive {
    pub const ALL: [AnchorActive; 4] = [
        AnchorActive::None,
        AnchorActive::G,
        AnchorActive::A,
        AnchorActive::AG,
    ];

    pub fn new(allow_a: bool, allow_g: bool) -> Self {
        match (allow_a, allow_g) {
            (true, true) => AnchorActive::AG,
            (true, false) => AnchorActive::A,
            (false, true) => AnchorActive::G,
            (false, false) => AnchorActive::None,
        }
    }

    pub fn allow_a(self) -> bool {
        matches!(self, AnchorActive::A | AnchorActive::AG)
    }

    pub fn allow_g(self) -> bool {
        matches!(self, AnchorActive::G | AnchorActive::AG)
    }

    /// Slot of that variant in the per-pattern caches
    pub fn index(self) -> usize {
        match self {
            AnchorActive::None => 0,
            AnchorActive::G => 1,
            AnchorActive::A => 2,
            AnchorActive::AG => 3,
        }
    }

    /// This follows vscode-textmate and replaces disabled anchors with a character that
    /// can't appear in the text. Escaped backslashes are skipped so `\\A` is left alone.
    pub fn replace_anchors(self, pat: &str) -> String {
        let mut out = String::with_capacity(pat.len());
        let mut chars = pat.chars();
        while let Some(c) = chars.next() {
            out.push(c);
            if c != '\\' {
                continue;
            }
            match chars.next() {
                Some('A') if !self.allow_a() => out.push('\u{FFFF}'),
                Some('G') if !self.allow_g() => out.push('\u{FFFF}'),
                Some(next) => out.push(next),
                None => (),
            }
        }
        out
    }
}

impl fmt::Debug for AnchorActive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnchorActive::A => "allow_A=true, allow_G=false",
            AnchorActive::G => "allow_A=false, allow_G=true",
            AnchorActive::AG => "allow_A=true, allow_G=true",
            AnchorActive::None => "allow_A=false, allow_G=false",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_only_disabled_anchors() {
        let pat = r"\A(a)|\G(b)|\\A";
        assert_eq!(AnchorActive::AG.replace_anchors(pat), pat);
        assert_eq!(
            AnchorActive::A.replace_anchors(pat),
            "\\A(a)|\\\u{FFFF}(b)|\\\\A"
        );
        assert_eq!(
            AnchorActive::G.replace_anchors(pat),
            "\\\u{FFFF}(a)|\\G(b)|\\\\A"
        );
        assert_eq!(
            AnchorActive::None.replace_anchors(pat),
            "\\\u{FFFF}(a)|\\\u{FFFF}(b)|\\\\A"
        );
    }

    #[test]
    fn indexes_are_distinct() {
        let mut seen: Vec<_> = AnchorActive::ALL.iter().map(|a| a.index()).collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3]);
        for a in AnchorActive::ALL {
            assert_eq!(AnchorActive::new(a.allow_a(), a.allow_g()), a);
        }
    }
}
