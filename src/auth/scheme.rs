/// How a request presents its credentials.
///
/// Produced by a single parse of the `Authorization` header and matched exhaustively by
/// the resolver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Bearer <token>` or `Token <token>`.
    Bearer(String),
    /// `Basic <base64(username:password)>`, still encoded.
    Basic(String),
    /// No header, or a blank one; look for username and password fields.
    FormCredentials,
    /// A header the resolver cannot interpret.
    Unrecognized,
}

impl AuthScheme {
    #[must_use]
    pub fn parse(header: Option<&str>) -> Self {
        let Some(header) = header.filter(|h| !h.trim().is_empty()) else {
            return Self::FormCredentials;
        };

        let mut parts = header.split_whitespace();
        let (Some(scheme), Some(credential), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Self::Unrecognized;
        };

        match scheme.to_ascii_lowercase().as_str() {
            "bearer" | "token" => Self::Bearer(credential.to_string()),
            "basic" => Self::Basic(credential.to_string()),
            _ => Self::Unrecognized,
        }
    }
}
