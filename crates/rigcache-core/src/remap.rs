//! Identifier rewriting for mirroring and renaming rigs.

use regex::Regex;

#[derive(Debug, thiserror::Error)]
pub enum RemapError {
    #[error("invalid rename pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A compiled `pattern → replacement` rename rule.
///
/// Capture groups in the pattern are kept verbatim around the replacement,
/// so `(^|_)l(_|$)` with `r` turns `a_l_b` into `a_r_b` and `l_arm` into
/// `r_arm`.
#[derive(Debug, Clone)]
pub struct Remapper {
    regex: Regex,
    replacement: String,
}

impl Remapper {
    pub fn new(pattern: &str, replacement: &str) -> Result<Self, RemapError> {
        let regex = Regex::new(pattern).map_err(|source| RemapError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            regex,
            replacement: replacement.to_string(),
        })
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    pub fn replacement(&self) -> &str {
        &self.replacement
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    /// Rewrite every match in `name`.
    ///
    /// Within each match, the text of every participating capture group is
    /// kept in place and the replacement is inserted once, at the first
    /// stretch of the match not covered by a group (or at the end of the
    /// match when groups cover all of it). A replacement containing `$` is
    /// expanded with the regex crate's own group syntax instead.
    pub fn apply(&self, name: &str) -> String {
        if self.replacement.contains('$') {
            return self
                .regex
                .replace_all(name, self.replacement.as_str())
                .into_owned();
        }

        let mut out = String::with_capacity(name.len() + self.replacement.len());
        let mut last = 0;
        for caps in self.regex.captures_iter(name) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            out.push_str(&name[last..whole.start()]);

            let mut groups: Vec<(usize, usize)> = caps
                .iter()
                .skip(1)
                .flatten()
                .map(|m| (m.start(), m.end()))
                .collect();
            groups.sort_unstable();

            let mut cursor = whole.start();
            let mut inserted = false;
            for (start, end) in groups {
                if start < cursor {
                    // Nested group; its text is already emitted by the outer one.
                    continue;
                }
                if start > cursor && !inserted {
                    out.push_str(&self.replacement);
                    inserted = true;
                }
                out.push_str(&name[start..end]);
                cursor = end;
            }
            if !inserted {
                out.push_str(&self.replacement);
            }
            last = whole.end();
        }
        out.push_str(&name[last..]);
        out
    }
}
