use rama::{
    error::{ErrorContext as _, extra::OpaqueError},
    http::Uri,
};

/// Syntactic matcher for absolute URLs pointing at one backend origin.
///
/// Matching is purely textual (no DNS resolution): an occurrence is
/// `<scheme>://<host>[:<port>]` followed by a `/`, compared
/// case-insensitively, with default-port equivalence (`https://host/` and
/// `https://host:443/` are the same origin).
#[derive(Debug, Clone)]
pub struct OriginMatcher {
    scheme: String,
    host: String,
    port: u16,
}

impl OriginMatcher {
    pub fn try_from_uri(origin: &Uri) -> Result<Self, OpaqueError> {
        let scheme = origin
            .scheme_str()
            .context("backend origin is missing a scheme")?
            .to_ascii_lowercase();
        let host = origin
            .host()
            .context("backend origin is missing a host")?
            .to_ascii_lowercase();
        let port = origin
            .port_u16()
            .unwrap_or(default_port_for_scheme(&scheme));
        Ok(Self { scheme, host, port })
    }

    fn has_default_port(&self) -> bool {
        self.port == default_port_for_scheme(&self.scheme)
    }

    /// Byte length of `<scheme>://<host>[:<port>]` at the start of `s`,
    /// if (and only if) it references this origin and is followed by `/`.
    fn match_len(&self, s: &str) -> Option<usize> {
        let rest = strip_prefix_ignore_ascii_case(s, &self.scheme)?;
        let rest = rest.strip_prefix("://")?;
        let rest = strip_prefix_ignore_ascii_case(rest, &self.host)?;
        let mut len = self.scheme.len() + 3 + self.host.len();

        let rest = match rest.strip_prefix(':') {
            Some(after_colon) => {
                let digits = after_colon
                    .find(|c: char| !c.is_ascii_digit())
                    .unwrap_or(after_colon.len());
                if digits == 0 {
                    return None;
                }
                let port: u32 = after_colon[..digits].parse().ok()?;
                if port != u32::from(self.port) {
                    return None;
                }
                len += 1 + digits;
                &after_colon[digits..]
            }
            None => {
                if !self.has_default_port() {
                    return None;
                }
                rest
            }
        };

        rest.starts_with('/').then_some(len)
    }

    fn first_byte(&self) -> u8 {
        // scheme is never empty (Uri guarantees it)
        self.scheme.as_bytes()[0]
    }
}

fn default_port_for_scheme(scheme: &str) -> u16 {
    if scheme == "https" { 443 } else { 80 }
}

fn strip_prefix_ignore_ascii_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let candidate = s.get(..prefix.len())?;
    candidate
        .eq_ignore_ascii_case(prefix)
        .then(|| &s[prefix.len()..])
}

/// Replace every absolute URL referencing `backend` with `proxy_base_url`,
/// leaving the remainder of path and query untouched.
///
/// Returns `None` when nothing was rewritten: either the body is not valid
/// UTF-8 (binary payloads pass through unmodified, by contract) or it
/// contains no occurrence of the backend origin. Rewriting an
/// already-rewritten body is therefore a no-op.
pub fn rewrite_origin_urls(
    body: &[u8],
    backend: &OriginMatcher,
    proxy_base_url: &str,
) -> Option<String> {
    let text = std::str::from_utf8(body).ok()?;
    let replacement = proxy_base_url.trim_end_matches('/');

    let mut out: Option<String> = None;
    let mut copied = 0;
    let mut i = 0;
    while i < text.len() {
        if !text.as_bytes()[i].eq_ignore_ascii_case(&backend.first_byte()) {
            i += 1;
            continue;
        }
        match backend.match_len(&text[i..]) {
            Some(len) => {
                let out = out.get_or_insert_with(|| String::with_capacity(text.len()));
                out.push_str(&text[copied..i]);
                out.push_str(replacement);
                i += len;
                copied = i;
            }
            None => i += 1,
        }
    }

    let mut out = out?;
    out.push_str(&text[copied..]);
    Some(out)
}

#[cfg(test)]
mod tests;
