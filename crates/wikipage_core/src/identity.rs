use crate::config::WikiConfig;

/// Resolves user ids to human-readable names.
pub trait IdentityService {
    fn display_name(&self, user_id: &str) -> Option<String>;
}

/// Identity lookup backed by the `[users]` config section.
#[derive(Debug, Clone, Default)]
pub struct ConfigIdentities {
    names: std::collections::BTreeMap<String, String>,
}

impl ConfigIdentities {
    pub fn from_config(config: &WikiConfig) -> Self {
        let names = config
            .users
            .iter()
            .filter_map(|(id, user)| {
                user.fullname
                    .as_deref()
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(|name| (id.clone(), name.to_string()))
            })
            .collect();
        Self { names }
    }
}

impl IdentityService for ConfigIdentities {
    fn display_name(&self, user_id: &str) -> Option<String> {
        self.names.get(user_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserConfig;

    #[test]
    fn blank_full_names_are_ignored() {
        let mut config = WikiConfig::default();
        config.users.insert(
            "alice".to_string(),
            UserConfig {
                fullname: Some("Alice Example".to_string()),
            },
        );
        config.users.insert(
            "bob".to_string(),
            UserConfig {
                fullname: Some(" ".to_string()),
            },
        );
        let identities = ConfigIdentities::from_config(&config);
        assert_eq!(
            identities.display_name("alice").as_deref(),
            Some("Alice Example")
        );
        assert_eq!(identities.display_name("bob"), None);
        assert_eq!(identities.display_name("carol"), None);
    }
}
