use url::Url;

pub const CANONICAL_SCHEME: &str = "https";
pub const CANONICAL_PATH: &str = "/vnc.html";

const FIXED_PARAMS: [(&str, &str); 2] = [("autoconnect", "true"), ("resize", "remote")];

/// Rewrites a remote-access URL into the single `https://<host>/vnc.html`
/// shape: other query parameters are kept in sorted order, the fixed
/// viewer parameters are appended, and fragments are dropped.
///
/// Input that is not an absolute web URL is returned trimmed but otherwise
/// untouched. `canonicalize(canonicalize(x)) == canonicalize(x)`.
pub fn canonicalize(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(parsed) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };
    if !matches!(parsed.scheme(), "http" | "https" | "ws" | "wss") || parsed.host_str().is_none()
    {
        return trimmed.to_string();
    }

    let mut params: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !FIXED_PARAMS.iter().any(|(fixed, _)| &**key == *fixed))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    params.sort();

    let port = parsed.port();
    let mut canonical = parsed;
    if canonical.set_scheme(CANONICAL_SCHEME).is_err() || canonical.set_port(port).is_err() {
        return trimmed.to_string();
    }
    canonical.set_path(CANONICAL_PATH);
    canonical.set_fragment(None);
    canonical.set_query(None);
    canonical
        .query_pairs_mut()
        .extend_pairs(params)
        .extend_pairs(FIXED_PARAMS);

    canonical.to_string()
}
