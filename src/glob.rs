// Compiles include/exclude glob patterns into `is_match`/`should_skip`
// predicates plus a base-directory extractor.
//
// Matching itself is delegated to `globset`, which already understands `*`,
// `**`, `?`, character classes, and `{a,b}` alternation correctly. Brace
// expansion is still performed by hand, as a pre-pass over the raw pattern
// string, because here it serves a different purpose than matching: it lets
// each alternative branch contribute its own (smaller) base directory to the
// watch footprint, a prefix-per-pattern granularity a single combined
// `GlobSet` cannot expose.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Rewrite platform path separators into the POSIX form all matching is
/// performed in, rewrite a `C:\...`-style drive-letter prefix to a leading
/// slash (`/C:/...`), and normalize a trailing slash / empty path.
fn normalize(path: &str) -> String {
    let mut s = path.replace('\\', "/");

    let drive_letter = s
        .as_bytes()
        .first()
        .filter(|b| b.is_ascii_alphabetic())
        .is_some()
        && s.as_bytes().get(1) == Some(&b':')
        && s.as_bytes().get(2).is_some_and(|b| *b == b'/');
    if drive_letter {
        s.insert(0, '/');
    }

    if s.len() > 1 && s.ends_with('/') {
        s.pop();
    }
    if s.is_empty() {
        s = ".".to_string();
    }
    s
}

/// Resolve a pattern against `cwd`, the way a relative filesystem path would
/// be resolved: an absolute pattern (leading `/`) is used as-is; a relative
/// one is joined onto `cwd`. Patterns are matched directly against absolute
/// filesystem paths, so an anchored pattern like `target/**` must itself be
/// absolute for the anchor to line up -- otherwise it would never match any
/// real (absolute) path and the exclude would silently do nothing.
fn resolve_against(cwd: &str, pattern: &str) -> String {
    let pattern = normalize(pattern);
    if pattern.starts_with('/') {
        pattern
    } else if pattern == "." {
        cwd.to_string()
    } else {
        normalize(&format!("{cwd}/{pattern}"))
    }
}

/// Expand a single top-level `{a,b,c}` alternation into multiple patterns.
/// Nested braces expand recursively. `\{`/`\}` are left literal.
fn expand_braces(pattern: &str) -> Vec<String> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut depth = 0usize;
    let mut start = None;
    let mut i = 0usize;

    while i < chars.len() {
        match chars[i] {
            '\\' => {
                i += 1; // skip the escaped character too
            }
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        let open = start.unwrap();
                        let prefix: String = chars[..open].iter().collect();
                        let suffix: String = chars[i + 1..].iter().collect();
                        let body: String = chars[open + 1..i].iter().collect();

                        let branches = split_top_level_commas(&body);
                        let mut out = Vec::new();
                        for branch in branches {
                            let combined = format!("{prefix}{branch}{suffix}");
                            out.extend(expand_braces(&combined));
                        }
                        return out;
                    }
                }
            }
            _ => {}
        }
        i += 1;
    }

    vec![pattern.to_string()]
}

fn split_top_level_commas(body: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '{' => {
                depth += 1;
                current.push(c);
            }
            '}' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

/// The longest prefix of an (already cwd-resolved, absolute) pattern
/// containing no glob metacharacter. Used to choose the watch root for a
/// given pattern.
fn base_directory(pattern: &str) -> PathBuf {
    let is_meta = |c: char| matches!(c, '*' | '?' | '[' | '{');
    let segments: Vec<&str> = pattern.trim_start_matches('/').split('/').collect();
    let mut base_segments = Vec::new();

    for seg in segments {
        if seg.is_empty() || seg.chars().any(is_meta) {
            break;
        }
        base_segments.push(seg);
    }

    if base_segments.is_empty() {
        PathBuf::from("/")
    } else {
        PathBuf::from(format!("/{}", base_segments.join("/")))
    }
}

struct CompiledPattern {
    base: PathBuf,
}

/// Compiled include/exclude pattern set with `is_match`/`should_skip`.
///
/// Patterns are resolved against a configured working directory at
/// construction time, so matching always compares two absolute, POSIX-form
/// strings regardless of platform or how the caller originally phrased the
/// pattern.
pub struct GlobMatcher {
    include: GlobSet,
    exclude: GlobSet,
    exclude_dir_prune: GlobSet,
    has_includes: bool,
    bases: Vec<CompiledPattern>,
}

impl GlobMatcher {
    pub fn new(includes: &[String], excludes: &[String], cwd: &Path) -> Result<Self> {
        let cwd = normalize(&cwd.to_string_lossy());

        let mut include_builder = GlobSetBuilder::new();
        let mut bases = Vec::new();

        for raw in includes {
            let resolved = resolve_against(&cwd, raw);
            for expanded in expand_braces(&resolved) {
                include_builder.add(Glob::new(&expanded)?);
                bases.push(CompiledPattern {
                    base: base_directory(&expanded),
                });
            }
        }

        let mut exclude_builder = GlobSetBuilder::new();
        let mut exclude_prune_builder = GlobSetBuilder::new();
        for raw in excludes {
            let resolved = resolve_against(&cwd, raw);
            for expanded in expand_braces(&resolved) {
                exclude_builder.add(Glob::new(&expanded)?);
                // A `foo/**` exclude also prunes the directory `foo` itself.
                let prune_target = expanded
                    .strip_suffix("/**")
                    .unwrap_or(&expanded)
                    .to_string();
                exclude_prune_builder.add(Glob::new(&prune_target)?);
            }
        }

        Ok(Self {
            include: include_builder.build()?,
            exclude: exclude_builder.build()?,
            exclude_dir_prune: exclude_prune_builder.build()?,
            has_includes: !includes.is_empty(),
            bases,
        })
    }

    /// True iff `path` should be surfaced as a file event: it matches some
    /// include pattern (or there are no includes) and no exclude pattern.
    /// `path` is expected to be absolute (every path this crate emits is).
    pub fn is_match(&self, path: &Path) -> bool {
        let normalized = normalize(&path.to_string_lossy());
        if self.has_includes && !self.include.is_match(&normalized) {
            return false;
        }
        !self.exclude.is_match(&normalized)
    }

    /// True iff `dir`'s entire subtree is excluded and can be pruned from
    /// the watch footprint.
    pub fn should_skip(&self, dir: &Path) -> bool {
        let normalized = normalize(&dir.to_string_lossy());
        self.exclude_dir_prune.is_match(&normalized)
    }

    /// Distinct, absolute base directories derived from the include
    /// patterns, each the longest glob-metacharacter-free prefix of its
    /// (cwd-resolved) pattern.
    pub fn base_directories(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self.bases.iter().map(|b| b.base.clone()).collect();
        dirs.sort();
        dirs.dedup();
        // Drop any base directory that is itself nested under another base
        // directory already in the set, to avoid watching the same subtree
        // via two separate roots.
        dirs.clone()
            .into_iter()
            .filter(|d| !dirs.iter().any(|other| other != d && d.starts_with(other)))
            .collect()
    }
}
