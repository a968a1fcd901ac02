use std::collections::BTreeMap;

/// Request variables for one page request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    values: BTreeMap<String, String>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Value for `key`; empty strings read as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Parse `key=value` pairs, ignoring entries without `=`.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut form = Self::new();
        for pair in pairs {
            if let Some((key, value)) = pair.as_ref().split_once('=') {
                form.set(key.trim(), value);
            }
        }
        form
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_values_read_as_absent() {
        let form = FormData::new().with("page", "Foo").with("version", "");
        assert_eq!(form.get("page"), Some("Foo"));
        assert_eq!(form.get("version"), None);
        assert_eq!(form.get("referrer"), None);
    }

    #[test]
    fn from_pairs_splits_on_first_equals() {
        let form = FormData::from_pairs(["page=A=B", "junk", " version =2"]);
        assert_eq!(form.get("page"), Some("A=B"));
        assert_eq!(form.get("version"), Some("2"));
        assert_eq!(form.get("junk"), None);
    }
}
