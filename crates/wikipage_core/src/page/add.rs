use anyhow::{Result, bail};
use serde_json::json;
use tracing::info;

use super::Page;
use crate::context::WikiContext;
use crate::mode::Mode;
use crate::store::SaveOutcome;

const SUPPORTED: &[Mode] = &[Mode::Display, Mode::Create];

/// Placeholder for a page that does not exist yet.
#[derive(Debug, Clone)]
pub struct AddPage {
    name: String,
}

impl AddPage {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Page for AddPage {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_modes(&self) -> &'static [Mode] {
        SUPPORTED
    }

    fn display_contents(&self, ctx: &WikiContext<'_>, _is_block: bool) -> Result<String> {
        let may_create = self.allows(ctx, Mode::Create)?;
        let message = if may_create {
            format!("{} does not exist. You can create it now.", self.name)
        } else {
            format!("{} does not exist.", self.name)
        };
        let create_url = may_create.then(|| {
            self.page_url(ctx, None, Some("create"))
                .render(false)
        });
        ctx.view.render(
            "page/create",
            &json!({
                "name": self.name,
                "message": message,
                "create_url": create_url,
            }),
        )
    }

    fn update_text(&self, ctx: &WikiContext<'_>, text: &str, changelog: &str) -> Result<SaveOutcome> {
        if ctx.store.page_id(&self.name)?.is_some() {
            bail!("page {} already exists", self.name);
        }
        let outcome = ctx
            .store
            .save_page(&self.name, text, ctx.actor.user.as_deref(), changelog)?;
        info!(page = %self.name, version = outcome.version(), "created page");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::FormData;
    use crate::page::fixtures::Harness;
    use crate::page::{Response, ResolvedPage, get_page};
    use crate::perms::Actor;
    use crate::store::PageStore;

    #[test]
    fn display_offers_creation_to_creators() {
        let harness = Harness::new();
        let ctx = harness.context(Actor::user("alice"));
        let page = AddPage::new("New Page");
        assert!(page.allows(&ctx, Mode::Create).expect("allows"));
        assert!(page.allows(&ctx, Mode::Display).expect("allows"));
        assert!(!page.allows(&ctx, Mode::Edit).expect("allows"));

        let Response::Content(body) = page
            .render(&ctx, Mode::Display, &FormData::new())
            .expect("display")
        else {
            panic!("add page renders content");
        };
        assert!(body.contains("New Page does not exist. You can create it now."));
        assert!(body.contains("create_url: /New%20Page?actionID=create"));
        assert!(!body.contains("version:"));
    }

    #[test]
    fn robots_never_create() {
        let harness = Harness::new();
        let ctx = harness.context(Actor {
            is_robot: true,
            ..Actor::admin("crawler")
        });
        assert!(!AddPage::new("X").allows(&ctx, Mode::Create).expect("allows"));
    }

    #[test]
    fn update_text_creates_first_version() {
        let harness = Harness::new();
        let ctx = harness.context(Actor::user("alice"));
        let ResolvedPage::Create(page) = get_page(&ctx, "Fresh", None, None).expect("page") else {
            panic!("missing page resolves to a create prompt");
        };
        let outcome = page.update_text(&ctx, "hello", "created").expect("create");
        assert_eq!(outcome, SaveOutcome::Created { version: "1".to_string() });
        assert!(matches!(
            get_page(&ctx, "Fresh", None, None).expect("page"),
            ResolvedPage::Live(_)
        ));
        assert!(page.update_text(&ctx, "again", "").is_err());
        assert_eq!(harness.store.page_names().expect("names"), vec!["Fresh"]);
    }
}
