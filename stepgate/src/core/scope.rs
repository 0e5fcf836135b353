//! Deterministic file-scope matching.
//!
//! Allowed scope is expressed as globs over repo-relative `/`-separated paths:
//! - `*` matches within one path segment;
//! - `?` matches one non-separator character;
//! - `**` matches across segments, and `**/` may match zero directories.

use regex::Regex;

/// Compiled set of allowed-scope globs.
#[derive(Debug, Clone)]
pub struct ScopeMatcher {
    patterns: Vec<Regex>,
}

impl ScopeMatcher {
    pub fn new<S: AsRef<str>>(globs: &[S]) -> Result<Self, regex::Error> {
        let patterns = globs
            .iter()
            .map(|glob| Regex::new(&glob_to_regex(glob.as_ref())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_allowed(&self, path: &str) -> bool {
        let normalized = normalize(path);
        self.patterns.iter().any(|re| re.is_match(&normalized))
    }

    /// Paths not covered by any glob, in input order.
    pub fn out_of_scope<S: AsRef<str>>(&self, paths: &[S]) -> Vec<String> {
        let mut outside = Vec::new();
        for path in paths {
            let path: &str = path.as_ref();
            if !self.is_allowed(path) {
                outside.push(path.to_string());
            }
        }
        outside
    }
}

fn normalize(path: &str) -> String {
    let unified = path.trim().replace('\\', "/");
    unified.trim_start_matches("./").to_string()
}

fn glob_to_regex(glob: &str) -> String {
    let glob = normalize(glob);
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::from("^");
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
            }
            '*' => {
                out.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            c => {
                out.push_str(&regex::escape(&c.to_string()));
                i += 1;
            }
        }
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(globs: &[&str]) -> ScopeMatcher {
        ScopeMatcher::new(globs).expect("globs")
    }

    #[test]
    fn single_star_stays_in_segment() {
        let m = matcher(&["src/*.rs"]);
        assert!(m.is_allowed("src/lib.rs"));
        assert!(!m.is_allowed("src/core/types.rs"));
    }

    #[test]
    fn double_star_crosses_segments() {
        let m = matcher(&["src/**/*.rs", "docs/**"]);
        assert!(m.is_allowed("src/lib.rs"));
        assert!(m.is_allowed("src/core/types.rs"));
        assert!(m.is_allowed("docs/feature/a/execution-log.json"));
        assert!(!m.is_allowed("tests/it.rs"));
    }

    #[test]
    fn literal_characters_are_escaped() {
        let m = matcher(&["Cargo.toml", "file?.txt"]);
        assert!(m.is_allowed("Cargo.toml"));
        assert!(!m.is_allowed("Cargoxtoml"));
        assert!(m.is_allowed("file1.txt"));
        assert!(!m.is_allowed("file12.txt"));
    }

    #[test]
    fn paths_are_normalized() {
        let m = matcher(&["./src/**"]);
        assert!(m.is_allowed("./src/main.rs"));
        assert!(m.is_allowed("src\\io\\git.rs"));
    }

    #[test]
    fn out_of_scope_preserves_order() {
        let m = matcher(&["src/**"]);
        let paths = vec!["README.md", "src/a.rs", "build.rs"];
        assert_eq!(m.out_of_scope(&paths), vec!["README.md", "build.rs"]);
    }
}
