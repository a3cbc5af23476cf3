//! URL glob matching and MIME scope matching (C1).

use har_types::ResponseBodyScope;
use regex::Regex;

/// Compiles `**`/`*`/`?` globs to an anchored regex. `**` matches any
/// characters including `/`; `*` excludes `/`; `?` matches one character.
/// Everything else is escaped literally.
fn glob_to_regex(pattern: &str) -> Regex {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str(".*");
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push('.'),
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).unwrap_or_else(|_| Regex::new("$^").expect("empty-match regex is valid"))
}

/// Include/exclude URL filtering. Excludes take precedence over includes;
/// an empty include list means "everything not excluded passes".
pub struct UrlMatcher {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl UrlMatcher {
    pub fn new(include_patterns: &[String], exclude_patterns: &[String]) -> Self {
        UrlMatcher {
            include: include_patterns.iter().map(|p| glob_to_regex(p)).collect(),
            exclude: exclude_patterns.iter().map(|p| glob_to_regex(p)).collect(),
        }
    }

    pub fn should_capture(&self, url: &str) -> bool {
        if self.exclude.iter().any(|re| re.is_match(url)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|re| re.is_match(url))
    }
}

/// MIME scope matching (C1). Comparison is on the part before `;`, case
/// insensitive.
pub struct MimeMatcher {
    scope: ResponseBodyScope,
    free_list: Vec<String>,
}

impl MimeMatcher {
    pub fn new(scope: ResponseBodyScope, free_list: &[String]) -> Self {
        MimeMatcher {
            scope,
            free_list: free_list.iter().map(|m| m.to_ascii_lowercase()).collect(),
        }
    }

    pub fn should_retrieve_body(&self, mime: &str, resource_type: &str) -> bool {
        let mime_base = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        if self.free_list.iter().any(|m| m == &mime_base) {
            return true;
        }
        match self.scope {
            ResponseBodyScope::None => false,
            ResponseBodyScope::PagesAndApi => {
                resource_type.eq_ignore_ascii_case("document")
                    || resource_type.eq_ignore_ascii_case("xhr")
                    || resource_type.eq_ignore_ascii_case("fetch")
            }
            ResponseBodyScope::All => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_star_crosses_path_separators() {
        let m = UrlMatcher::new(&[], &["**/*.png".to_owned()]);
        assert!(!m.should_capture("https://example.com/a/b/logo.png"));
        assert!(m.should_capture("https://example.com/a/b/page.html"));
    }

    #[test]
    fn single_star_does_not_cross_path_separators() {
        let m = UrlMatcher::new(&["https://example.com/*".to_owned()], &[]);
        assert!(m.should_capture("https://example.com/page"));
        assert!(!m.should_capture("https://example.com/a/page"));
    }

    #[test]
    fn exclude_takes_precedence_over_include() {
        let m = UrlMatcher::new(
            &["**/*.example.com/**".to_owned(), "https://example.com/**".to_owned()],
            &["**/secret/**".to_owned()],
        );
        assert!(!m.should_capture("https://example.com/secret/data"));
    }

    #[test]
    fn empty_include_list_accepts_everything_not_excluded() {
        let m = UrlMatcher::new(&[], &["**/*.png".to_owned()]);
        assert!(m.should_capture("https://example.com/anything"));
    }

    #[test]
    fn mime_scope_none_never_retrieves() {
        let m = MimeMatcher::new(ResponseBodyScope::None, &[]);
        assert!(!m.should_retrieve_body("text/html", "document"));
    }

    #[test]
    fn mime_scope_pages_and_api_excludes_images() {
        let m = MimeMatcher::new(ResponseBodyScope::PagesAndApi, &[]);
        assert!(m.should_retrieve_body("text/html; charset=utf-8", "document"));
        assert!(!m.should_retrieve_body("image/png", "image"));
    }

    #[test]
    fn mime_free_list_overrides_scope() {
        let m = MimeMatcher::new(ResponseBodyScope::None, &["image/png".to_owned()]);
        assert!(m.should_retrieve_body("IMAGE/PNG", "image"));
    }
}
