/// Supplies the bearer token for backend calls.
///
/// Backends receive a provider at construction and never look up session
/// state on their own.
pub trait AuthTokenProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// Anonymous access; the backend decides what an unauthenticated user sees.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

impl AuthTokenProvider for NoAuth {
    fn bearer_token(&self) -> Option<String> {
        None
    }
}

/// A token fixed at startup, e.g. from `LEARN_PROGRESS_API_TOKEN`.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(***)")
    }
}

impl AuthTokenProvider for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        let token = self.0.trim();
        (!token.is_empty()).then(|| token.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_static_token_sends_nothing() {
        assert_eq!(StaticToken::new("  ").bearer_token(), None);
        assert_eq!(
            StaticToken::new("abc").bearer_token(),
            Some("abc".to_string())
        );
        assert_eq!(NoAuth.bearer_token(), None);
    }

    #[test]
    fn debug_hides_the_token() {
        assert_eq!(format!("{:?}", StaticToken::new("secret")), "StaticToken(***)");
    }
}
