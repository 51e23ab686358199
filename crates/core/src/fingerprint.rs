use sha2::{Digest, Sha256};

/// Headers that differ between retries of the same logical request.
const VOLATILE_HEADERS: &[&str] = &[
    "authorization",
    "connection",
    "content-length",
    "cookie",
    "date",
    "forwarded",
    "host",
    "idempotency-key",
    "traceparent",
    "tracestate",
    "user-agent",
    "x-correlation-id",
    "x-real-ip",
    "x-request-id",
];

fn is_volatile(name: &str) -> bool {
    VOLATILE_HEADERS.contains(&name) || name.starts_with("x-forwarded-")
}

/// Hex SHA-256 over a canonical rendering of the request.
///
/// Query parameters and headers are sorted so ordering differences between
/// client retries do not change the hash. Header names are case-folded and
/// values trimmed; volatile headers are dropped.
pub fn request_hash<'a, I>(
    method: &str,
    path: &str,
    query: Option<&str>,
    headers: I,
    body: &[u8],
) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut query_pairs: Vec<&str> =
        query.unwrap_or_default().split('&').filter(|pair| !pair.is_empty()).collect();
    query_pairs.sort_unstable();

    let mut header_lines: Vec<String> = headers
        .into_iter()
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim()))
        .filter(|(name, _)| !is_volatile(name))
        .map(|(name, value)| format!("{name}:{value}"))
        .collect();
    header_lines.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(method.trim().to_ascii_uppercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(path.as_bytes());
    hasher.update(b"\n");
    hasher.update(query_pairs.join("&").as_bytes());
    hasher.update(b"\n");
    hasher.update(header_lines.join("\n").as_bytes());
    hasher.update(b"\n\n");
    hasher.update(body);
    hex::encode(hasher.finalize())
}
