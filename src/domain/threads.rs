//! Thread content rules.

use url::Url;

use crate::domain::error::DomainError;

pub const TEXT_MAX_LEN: usize = 1000;
pub const FEED_PAGE_SIZE: u32 = 30;
const LOCAL_UPLOAD_PREFIX: &str = "/uploads/";

/// Validate thread or reply text. Returns the trimmed text.
pub fn validate_text(raw: &str) -> Result<String, DomainError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(
            "text",
            "must contain at least 1 character",
        ));
    }
    if trimmed.chars().count() > TEXT_MAX_LEN {
        return Err(DomainError::validation(
            "text",
            format!("must be at most {TEXT_MAX_LEN} characters"),
        ));
    }
    Ok(trimmed.to_string())
}

/// Validate an optional image reference. Blank input means "no image".
///
/// Accepted forms are absolute `http(s)` URLs and paths served by the local
/// upload store.
pub fn validate_image_url(raw: Option<&str>) -> Result<Option<String>, DomainError> {
    let Some(value) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };

    if let Some(rest) = value.strip_prefix(LOCAL_UPLOAD_PREFIX) {
        if rest.is_empty() || rest.split('/').any(|segment| segment == "..") {
            return Err(DomainError::validation(
                "image_url",
                "upload path is not valid",
            ));
        }
        return Ok(Some(value.to_string()));
    }

    let parsed = Url::parse(value)
        .map_err(|err| DomainError::validation("image_url", format!("invalid url: {err}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(Some(parsed.to_string())),
        other => Err(DomainError::validation(
            "image_url",
            format!("unsupported scheme `{other}`"),
        )),
    }
}

/// Short single-line preview used by notifications and activity rows.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let flattened = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() <= max_chars {
        return flattened;
    }
    let mut cut: String = flattened.chars().take(max_chars).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_requires_one_visible_character() {
        assert!(validate_text(" \n ").is_err());
        assert_eq!(validate_text("  hi ").unwrap(), "hi");
    }

    #[test]
    fn text_is_bounded() {
        assert!(validate_text(&"a".repeat(TEXT_MAX_LEN)).is_ok());
        assert!(validate_text(&"a".repeat(TEXT_MAX_LEN + 1)).is_err());
    }

    #[test]
    fn image_urls_accept_http_and_local_uploads() {
        assert_eq!(validate_image_url(None).unwrap(), None);
        assert_eq!(validate_image_url(Some("  ")).unwrap(), None);
        assert_eq!(
            validate_image_url(Some("/uploads/2026/01/02/cat.png")).unwrap(),
            Some("/uploads/2026/01/02/cat.png".to_string())
        );
        assert!(
            validate_image_url(Some("https://cdn.example.com/a.png"))
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn image_urls_reject_other_schemes_and_traversal() {
        assert!(validate_image_url(Some("javascript:alert(1)")).is_err());
        assert!(validate_image_url(Some("/uploads/../secret")).is_err());
        assert!(validate_image_url(Some("not a url")).is_err());
    }

    #[test]
    fn excerpt_flattens_and_truncates() {
        assert_eq!(excerpt("a\n\nb", 10), "a b");
        assert_eq!(excerpt("abcdef", 3), "abc…");
    }
}
