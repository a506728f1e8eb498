use std::fmt;

/// Login material handed to `open_session`.
///
/// Every combination of an optional login and an optional password is a
/// distinct variant so connectors have to handle each one explicitly.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Neither login nor password: local user name, key or `none` auth.
    Anonymous,
    /// Password for the local user name.
    PasswordOnly(String),
    LoginPassword(String, String),
    /// Login without password: key or `none` auth.
    LoginOnly(String),
}

impl Credentials {
    pub fn from_parts(login: Option<String>, password: Option<String>) -> Self {
        match (login, password) {
            (None, None) => Credentials::Anonymous,
            (None, Some(password)) => Credentials::PasswordOnly(password),
            (Some(login), Some(password)) => Credentials::LoginPassword(login, password),
            (Some(login), None) => Credentials::LoginOnly(login),
        }
    }

    pub fn login(&self) -> Option<&str> {
        match self {
            Credentials::LoginPassword(login, _) | Credentials::LoginOnly(login) => Some(login),
            Credentials::Anonymous | Credentials::PasswordOnly(_) => None,
        }
    }

    pub fn password(&self) -> Option<&str> {
        match self {
            Credentials::PasswordOnly(password) | Credentials::LoginPassword(_, password) => {
                Some(password)
            }
            Credentials::Anonymous | Credentials::LoginOnly(_) => None,
        }
    }

    /// The user name to authenticate as; falls back to the local account.
    pub fn resolve_login(&self) -> crate::Result<String> {
        if let Some(login) = self.login() {
            return Ok(login.to_string());
        }
        local_user_name().ok_or_else(|| {
            crate::Error::ConfigError(
                "no login given and the local user name is unknown".to_string(),
            )
        })
    }
}

fn local_user_name() -> Option<String> {
    ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|name| !name.is_empty())
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Anonymous => f.write_str("Anonymous"),
            Credentials::PasswordOnly(_) => f.write_str("PasswordOnly(***)"),
            Credentials::LoginPassword(login, _) => write!(f, "LoginPassword({}, ***)", login),
            Credentials::LoginOnly(login) => write!(f, "LoginOnly({})", login),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_parts_covers_every_combination() {
        assert_eq!(Credentials::from_parts(None, None), Credentials::Anonymous);
        assert_eq!(
            Credentials::from_parts(None, Some("pw".into())),
            Credentials::PasswordOnly("pw".into())
        );
        assert_eq!(
            Credentials::from_parts(Some("root".into()), Some("pw".into())),
            Credentials::LoginPassword("root".into(), "pw".into())
        );
        assert_eq!(
            Credentials::from_parts(Some("root".into()), None),
            Credentials::LoginOnly("root".into())
        );
    }

    #[test]
    fn explicit_login_wins() {
        let creds = Credentials::LoginOnly("svc".into());
        assert_eq!(creds.resolve_login().unwrap(), "svc");
        assert_eq!(creds.password(), None);
    }

    #[test]
    fn debug_hides_password() {
        let creds = Credentials::LoginPassword("admin".into(), "hunter2".into());
        let shown = format!("{:?}", creds);
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("admin"));
    }
}
