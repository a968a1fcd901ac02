use anyhow::{Context, Result, bail};
use url::Url;

pub const PAGE_PLACEHOLDER: &str = "%s";

/// Builds page links below the configured base URL: `<base>/<page>?<params>`.
#[derive(Debug, Clone)]
pub struct WikiUrls {
    base: Url,
}

impl WikiUrls {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base =
            Url::parse(base_url.trim()).with_context(|| format!("invalid base url `{base_url}`"))?;
        if base.cannot_be_a_base() {
            bail!("base url `{base_url}` cannot carry page paths");
        }
        base.set_query(None);
        base.set_fragment(None);
        Ok(Self { base })
    }

    pub fn page(&self, page: &str) -> PageUrl {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            for segment in page.split('/').filter(|segment| !segment.is_empty()) {
                segments.push(segment);
            }
        }
        PageUrl { url }
    }

    /// Link template for markup link rules: the page name slot stays a literal `%s`.
    pub fn link_template(&self, referrer: &str, full: bool) -> String {
        self.page(PAGE_PLACEHOLDER)
            .with("referrer", referrer)
            .render(full)
            .replace("%25s", PAGE_PLACEHOLDER)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageUrl {
    url: Url,
}

impl PageUrl {
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.url.query_pairs_mut().append_pair(key, value);
        self
    }

    pub fn with_opt(self, key: &str, value: Option<&str>) -> Self {
        match value.filter(|value| !value.is_empty()) {
            Some(value) => self.with(key, value),
            None => self,
        }
    }

    /// Absolute URL when `full`, otherwise path plus query.
    pub fn render(&self, full: bool) -> String {
        if full {
            return self.url.to_string();
        }
        match self.url.query() {
            Some(query) => format!("{}?{query}", self.url.path()),
            None => self.url.path().to_string(),
        }
    }
}
