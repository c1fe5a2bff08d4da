//! URL normalization: the join key that lets cache hits survive session ids.

/// Strips the scheme and a leading `www.`, replaces purely numeric path
/// segments with `*`, and truncates to 512 chars. Query and fragment are
/// dropped. Idempotent: `normalize_url(normalize_url(u)) == normalize_url(u)`.
pub fn normalize_url(url: &str) -> String {
    let raw = url.trim();
    let without_scheme = match raw.split_once("://") {
        Some((_, rest)) => rest,
        None => raw,
    };
    let without_fragment = without_scheme
        .split_once('#')
        .map(|(head, _)| head)
        .unwrap_or(without_scheme);
    let without_query = without_fragment
        .split_once('?')
        .map(|(head, _)| head)
        .unwrap_or(without_fragment);

    let (host, path) = match without_query.split_once('/') {
        Some((host, path)) => (host, Some(path)),
        None => (without_query, None),
    };
    let host = host.strip_prefix("www.").unwrap_or(host);

    let mut out = host.to_string();
    if let Some(path) = path {
        for segment in path.split('/') {
            out.push('/');
            if !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()) {
                out.push('*');
            } else {
                out.push_str(segment);
            }
        }
    }
    out.truncate(512);
    out
}
