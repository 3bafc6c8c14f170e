use secrecy::{ExposeSecret, SecretString};

pub const DEFAULT_PROFILE: &str = "default";

/// Provider credentials for a single invocation. Never persisted by the routing core.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
    pub profile: String,
}

impl Credentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        profile: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: SecretString::from(secret_access_key.into()),
            profile: profile.into(),
        }
    }

    /// Shared-credentials file body holding the key pair under `profile`.
    ///
    /// The provider CLI ignores `AWS_ACCESS_KEY_ID` once `--profile` is given,
    /// so the keys have to be resolvable through the named profile.
    pub fn shared_credentials_file(&self, profile: &str) -> String {
        format!(
            "[{profile}]\naws_access_key_id = {}\naws_secret_access_key = {}\n",
            self.access_key_id,
            self.secret_access_key.expose_secret()
        )
    }

    /// Matching config file body. Named profiles carry a `profile ` prefix there.
    pub fn shared_config_file(profile: &str) -> String {
        if profile == DEFAULT_PROFILE {
            format!("[{DEFAULT_PROFILE}]\n")
        } else {
            format!("[profile {profile}]\n")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Credentials;

    #[test]
    fn debug_output_redacts_secret_key() {
        let credentials = Credentials::new("AKIAEXAMPLE", "super-secret-value", "dev");
        let debug = format!("{credentials:?}");

        assert!(debug.contains("AKIAEXAMPLE"));
        assert!(!debug.contains("super-secret-value"));
    }

    #[test]
    fn credentials_file_lists_key_pair_under_profile() {
        let credentials = Credentials::new("AKIAEXAMPLE", "super-secret-value", "dev");

        assert_eq!(
            credentials.shared_credentials_file("dev"),
            "[dev]\naws_access_key_id = AKIAEXAMPLE\naws_secret_access_key = super-secret-value\n"
        );
    }

    #[test]
    fn config_file_prefixes_named_profiles_only() {
        assert_eq!(Credentials::shared_config_file("default"), "[default]\n");
        assert_eq!(Credentials::shared_config_file("dev"), "[profile dev]\n");
    }
}
