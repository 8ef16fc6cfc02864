use http::Uri;
use http::uri::{Authority, Parts, PathAndQuery, Scheme};

/// Normalizes a request URI for use as cache-key material.
///
/// Scheme and host are lower-cased, default ports are dropped, an empty path
/// becomes `/`, dot segments are removed and percent-escapes are upper-cased.
/// A URI that cannot be rebuilt from its normalized parts is returned as-is.
pub fn normalize_uri(uri: &Uri) -> Uri {
    let scheme = uri.scheme_str().map(|s| s.to_ascii_lowercase());
    let authority = uri
        .authority()
        .map(|authority| normalize_authority(authority, scheme.as_deref()));

    let path = normalize_path(uri.path(), authority.is_some());
    let path_and_query = match uri.query() {
        Some(query) => format!("{path}?{}", uppercase_escapes(query)),
        None => path,
    };

    let mut parts = Parts::default();
    if let Some(scheme) = scheme {
        match Scheme::try_from(scheme.as_str()) {
            Ok(scheme) => parts.scheme = Some(scheme),
            Err(_) => return uri.clone(),
        }
    }
    if let Some(authority) = authority {
        match Authority::try_from(authority.as_str()) {
            Ok(authority) => parts.authority = Some(authority),
            Err(_) => return uri.clone(),
        }
    }
    match PathAndQuery::try_from(path_and_query.as_str()) {
        Ok(pq) => parts.path_and_query = Some(pq),
        Err(_) => return uri.clone(),
    }
    Uri::from_parts(parts).unwrap_or_else(|_| uri.clone())
}

fn normalize_authority(authority: &Authority, scheme: Option<&str>) -> String {
    let host = authority.host().to_ascii_lowercase();
    let userinfo = authority
        .as_str()
        .rsplit_once('@')
        .map(|(userinfo, _)| format!("{userinfo}@"))
        .unwrap_or_default();
    match (authority.port_u16(), scheme) {
        (Some(80), Some("http")) | (Some(443), Some("https")) | (None, _) => {
            format!("{userinfo}{host}")
        }
        (Some(port), _) => format!("{userinfo}{host}:{port}"),
    }
}

fn normalize_path(path: &str, has_authority: bool) -> String {
    if path.is_empty() {
        return if has_authority { "/".to_string() } else { String::new() };
    }
    let path = remove_dot_segments(path);
    let path = uppercase_escapes(&path);
    if path.is_empty() && has_authority {
        return "/".to_string();
    }
    path
}

/// RFC 3986 section 5.2.4.
fn remove_dot_segments(path: &str) -> String {
    let mut output: Vec<&str> = Vec::new();
    let absolute = path.starts_with('/');
    let segments: Vec<&str> = path.split('/').collect();
    let last = segments.len().saturating_sub(1);
    let mut trailing_slash = false;

    for (idx, segment) in segments.iter().enumerate() {
        match *segment {
            "." => trailing_slash = idx == last,
            ".." => {
                if output.len() > usize::from(absolute) {
                    output.pop();
                }
                trailing_slash = idx == last;
            }
            other => {
                output.push(other);
                trailing_slash = false;
            }
        }
    }

    let mut normalized = output.join("/");
    if absolute && !normalized.starts_with('/') {
        normalized.insert(0, '/');
    }
    if trailing_slash && !normalized.ends_with('/') {
        normalized.push('/');
    }
    normalized
}

fn uppercase_escapes(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'%'
            && idx + 2 < bytes.len()
            && bytes[idx + 1].is_ascii_hexdigit()
            && bytes[idx + 2].is_ascii_hexdigit()
        {
            out.push('%');
            out.push(bytes[idx + 1].to_ascii_uppercase() as char);
            out.push(bytes[idx + 2].to_ascii_uppercase() as char);
            idx += 3;
            continue;
        }
        let ch = input[idx..].chars().next().unwrap_or('\u{fffd}');
        out.push(ch);
        idx += ch.len_utf8();
    }
    out
}
