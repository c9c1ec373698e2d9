use anyhow::{bail, Context, Result};

/// OAuth application credentials sent as basic auth to raise the API rate
/// limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubAuth {
    pub client_id: String,
    pub client_secret: String,
}

impl GitHubAuth {
    /// Parse credentials written in URL query form,
    /// `client_id=...&client_secret=...`.
    ///
    /// An empty string means no credentials.
    pub fn parse(credentials: &str) -> Result<Option<Self>> {
        let credentials = credentials.trim();
        if credentials.is_empty() {
            return Ok(None);
        }

        let mut client_id = None;
        let mut client_secret = None;
        for pair in credentials.split('&').filter(|pair| !pair.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                bail!("Malformed credential pair '{}'", pair);
            };
            if !has_valid_escapes(value) {
                bail!("Invalid escape in credential '{}'", key);
            }
            let value = urlencoding::decode(&value.replace('+', " "))
                .with_context(|| format!("Credential '{}' is not valid UTF-8", key))?
                .into_owned();
            match key {
                "client_id" => client_id = Some(value),
                "client_secret" => client_secret = Some(value),
                _ => bail!("Unknown credential key '{}'", key),
            }
        }

        match (client_id, client_secret) {
            (Some(client_id), Some(client_secret)) if !client_id.is_empty() => {
                Ok(Some(Self {
                    client_id,
                    client_secret,
                }))
            }
            _ => bail!("Credentials need both client_id and client_secret"),
        }
    }
}

/// Every `%` must start a two-digit hex escape.
fn has_valid_escapes(value: &str) -> bool {
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let escape = bytes.get(i + 1..i + 3);
            if !escape.is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit)) {
                return false;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_form() {
        let auth = GitHubAuth::parse("client_id=abc&client_secret=s%2Fecret")
            .unwrap()
            .unwrap();
        assert_eq!(auth.client_id, "abc");
        assert_eq!(auth.client_secret, "s/ecret");
    }

    #[test]
    fn empty_means_anonymous() {
        assert!(GitHubAuth::parse("").unwrap().is_none());
        assert!(GitHubAuth::parse("   ").unwrap().is_none());
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(GitHubAuth::parse("client_id").is_err());
        assert!(GitHubAuth::parse("client_id=abc").is_err());
        assert!(GitHubAuth::parse("client_id=abc&client_secret=%zz").is_err());
        assert!(GitHubAuth::parse("client_id=abc&client_secret=x&token=y").is_err());
    }
}
