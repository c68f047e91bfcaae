use anyhow::{bail, Result};

/// RFC-1123-ish hostname check: dot-separated labels of alphanumerics and
/// hyphens, no label edge hyphens, 253 chars overall.
pub fn validate_domain(domain: &str) -> Result<()> {
    if domain.is_empty() || domain.len() > 253 {
        bail!("Invalid domain: {}", domain);
    }

    for label in domain.split('.') {
        if label.is_empty() || label.len() > 63 {
            bail!("Invalid domain: {}", domain);
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            bail!("Invalid domain: {}", domain);
        }
        if label.starts_with('-') || label.ends_with('-') {
            bail!("Invalid domain: {}", domain);
        }
    }

    Ok(())
}

/// Application ports live in the unprivileged range.
pub fn validate_port(port: u16) -> Result<()> {
    if port < 1024 {
        bail!("Invalid port: {}. Must be between 1024 and 65535", port);
    }
    Ok(())
}

pub fn validate_branch(branch: &str) -> Result<()> {
    if branch.is_empty() || branch.len() > 255 {
        bail!("Invalid branch name: {}", branch);
    }
    if branch.starts_with('.') || branch.contains("..") {
        bail!("Invalid branch name: {}", branch);
    }
    if branch
        .chars()
        .any(|c| matches!(c, '@' | '{' | '~' | '^' | ':' | '\\') || c.is_whitespace())
    {
        bail!("Invalid branch name: {}", branch);
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<()> {
    let Some((local, host)) = email.split_once('@') else {
        bail!("Invalid email address: {}", email);
    };
    if local.is_empty() || host.is_empty() || !host.contains('.') || host.ends_with('.') {
        bail!("Invalid email address: {}", email);
    }
    Ok(())
}

/// Parse a `KEY=VALUE` pair. Keys follow the shell convention: uppercase,
/// digits and underscores, not starting with a digit.
pub fn parse_env_pair(pair: &str) -> Result<(String, String)> {
    let Some((key, value)) = pair.split_once('=') else {
        bail!("Invalid environment variable (expected KEY=VALUE): {}", pair);
    };

    let key = key.trim();
    let value = value.trim();

    let valid_key = !key.is_empty()
        && key
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_uppercase() || c == '_')
        && key
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');

    if !valid_key {
        bail!("Invalid environment variable name: {}", key);
    }

    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_normal_domains() {
        assert!(validate_domain("example.com").is_ok());
        assert!(validate_domain("sub.domain.example.co.uk").is_ok());
        assert!(validate_domain("xn--bcher-kva.example").is_ok());
        assert!(validate_domain("localhost").is_ok());
    }

    #[test]
    fn rejects_bad_domains() {
        assert!(validate_domain("").is_err());
        assert!(validate_domain("-leading.example.com").is_err());
        assert!(validate_domain("trailing-.example.com").is_err());
        assert!(validate_domain("spaces in.example.com").is_err());
        assert!(validate_domain("double..dot.com").is_err());
        assert!(validate_domain(&"a".repeat(254)).is_err());
    }

    #[test]
    fn rejects_privileged_ports() {
        assert!(validate_port(80).is_err());
        assert!(validate_port(1023).is_err());
        assert!(validate_port(1024).is_ok());
        assert!(validate_port(65535).is_ok());
    }

    #[test]
    fn branch_rules() {
        assert!(validate_branch("main").is_ok());
        assert!(validate_branch("feature/login-form").is_ok());
        assert!(validate_branch(".hidden").is_err());
        assert!(validate_branch("a..b").is_err());
        assert!(validate_branch("has space").is_err());
        assert!(validate_branch("weird~ref").is_err());
    }

    #[test]
    fn email_rules() {
        assert!(validate_email("admin@example.com").is_ok());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("admin@nodot").is_err());
    }

    #[test]
    fn env_pair_rules() {
        assert_eq!(
            parse_env_pair("API_KEY=secret").unwrap(),
            ("API_KEY".into(), "secret".into())
        );
        assert_eq!(
            parse_env_pair("DB_URL=postgres://x?a=b").unwrap(),
            ("DB_URL".into(), "postgres://x?a=b".into())
        );
        assert!(parse_env_pair("no-equals").is_err());
        assert!(parse_env_pair("lower=case").is_err());
        assert!(parse_env_pair("1BAD=x").is_err());
    }
}
