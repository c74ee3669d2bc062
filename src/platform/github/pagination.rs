use std::collections::HashMap;

/// Parse a `Link` header into a relation -> URL map.
///
/// Input is a comma-separated list of `<url>; rel="name"` entries. Entries
/// missing the URL or the `rel` degrade to empty strings instead of failing
/// the whole header.
pub fn parse_link_header(header: &str) -> HashMap<String, String> {
    header
        .split(',')
        .map(|entry| {
            let mut parts = entry.split(';');
            let url = parts.next().map(extract_url).unwrap_or_default();
            let rel = parts.next().map(extract_rel).unwrap_or_default();
            (rel.to_string(), url.to_string())
        })
        .collect()
}

fn extract_url(part: &str) -> &str {
    let part = part.trim();
    part.find('<')
        .and_then(|start| {
            let rest = &part[start + 1..];
            rest.find('>').map(|end| &rest[..end])
        })
        .unwrap_or("")
}

fn extract_rel(part: &str) -> &str {
    const MARKER: &str = "rel=\"";
    part.find(MARKER)
        .and_then(|start| {
            let rest = &part[start + MARKER.len()..];
            rest.find('"').map(|end| &rest[..end])
        })
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_next_and_last() {
        let header = r#"<https://api.github.com/search/code?q=addClass+user%3Amozilla&page=2>; rel="next", <https://api.github.com/search/code?q=addClass+user%3Amozilla&page=34>; rel="last""#;
        let links = parse_link_header(header);

        assert_eq!(links.len(), 2);
        assert_eq!(
            links["next"],
            "https://api.github.com/search/code?q=addClass+user%3Amozilla&page=2"
        );
        assert_eq!(
            links["last"],
            "https://api.github.com/search/code?q=addClass+user%3Amozilla&page=34"
        );
    }

    #[test]
    fn test_missing_rel_maps_to_empty_name() {
        let links = parse_link_header("<https://example.com/p2>");
        assert_eq!(links.get("").map(String::as_str), Some("https://example.com/p2"));
    }

    #[test]
    fn test_missing_url_maps_to_empty_value() {
        let links = parse_link_header(r#"garbage; rel="next""#);
        assert_eq!(links.get("next").map(String::as_str), Some(""));
    }

    #[test]
    fn test_empty_header() {
        let links = parse_link_header("");
        assert_eq!(links.get("").map(String::as_str), Some(""));
        assert!(!links.contains_key("next"));
    }
}
