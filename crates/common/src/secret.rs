//! Secret wrapper for sensitive values such as an outbound proxy URL
//!
//! Proxy URLs commonly embed `user:password@` credentials. The wrapper keeps
//! them out of Debug/Display output and zeroes the buffer on drop;
//! `redact_url` gives a loggable form that keeps scheme, host and port.

use std::fmt;

use reqwest::Url;
use zeroize::Zeroize;

/// Sensitive value - redacted in Debug/Display/logs
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Loggable form of a secret URL with any userinfo replaced.
    pub fn redacted_url(&self) -> String {
        redact_url(&self.0)
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

/// Replace the `user:password@` part of a URL with `***@`.
///
/// Anything after the authority (path, query) is dropped as well, since
/// some proxy providers put session tokens there.
pub fn redact_url(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return redact_unparsed(url);
    };
    if !parsed.has_host() {
        return redact_unparsed(url);
    }
    let had_credentials = !parsed.username().is_empty() || parsed.password().is_some();
    // The setters only fail for URLs that cannot carry credentials.
    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.set_path("");
    parsed.set_query(None);
    parsed.set_fragment(None);

    let bare = parsed.as_str().trim_end_matches('/');
    match bare.split_once("://") {
        Some((scheme, authority)) if had_credentials => format!("{scheme}://***@{authority}"),
        _ => bare.to_string(),
    }
}

/// Fallback for strings `Url` rejects, e.g. a host with a space in it.
fn redact_unparsed(url: &str) -> String {
    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, url),
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = match authority.rsplit_once('@') {
        Some((_, host)) => format!("***@{host}"),
        None => authority.to_string(),
    };
    match scheme {
        Some(scheme) => format!("{scheme}://{host}"),
        None => host,
    }
}
