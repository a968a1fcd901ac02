use anyhow::Result;

use super::standard::unified_diff;
use super::{DELETE_PAGE_NAME, Page, Response};
use crate::context::WikiContext;
use crate::error::PageError;
use crate::mode::Mode;
use crate::store::PageRecord;

const SUPPORTED: &[Mode] = &[Mode::Content, Mode::Display, Mode::Remove, Mode::Diff];

/// A prior version of a page, served read-only.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    name: String,
    requested_version: String,
    record: Option<PageRecord>,
}

impl HistoryPage {
    pub fn load(ctx: &WikiContext<'_>, name: &str, version: &str) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            requested_version: version.to_string(),
            record: ctx.store.load_version(name, version)?,
        })
    }

    pub fn requested_version(&self) -> &str {
        &self.requested_version
    }

    fn loaded(&self) -> Result<&PageRecord> {
        self.record.as_ref().ok_or_else(|| {
            PageError::InvalidVersion {
                page: self.name.clone(),
                version: self.requested_version.clone(),
            }
            .into()
        })
    }
}

impl Page for HistoryPage {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_modes(&self) -> &'static [Mode] {
        SUPPORTED
    }

    fn record(&self) -> Option<&PageRecord> {
        self.record.as_ref()
    }

    fn is_old(&self) -> bool {
        true
    }

    fn page_title(&self) -> String {
        format!("{} (version {})", self.name, self.requested_version)
    }

    fn diff(&self, ctx: &WikiContext<'_>, against: Option<&str>) -> Result<String> {
        unified_diff(self, ctx, self.loaded()?, against)
    }

    fn display_contents(&self, ctx: &WikiContext<'_>, _is_block: bool) -> Result<String> {
        let record = self.loaded()?;
        let processor = self.processor(ctx, ctx.output)?;
        ctx.markup.render(&processor, &record.text)
    }

    fn remove(&self, ctx: &WikiContext<'_>) -> Result<Response> {
        let record = self.loaded()?;
        Ok(Response::Redirect(
            ctx.urls
                .page(DELETE_PAGE_NAME)
                .with("referrer", &self.name)
                .with("version", &record.version)
                .render(false),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::FormData;
    use crate::page::fixtures::Harness;
    use crate::perms::Actor;
    use crate::store::PageStore;

    fn seeded() -> Harness {
        let harness = Harness::new();
        for text in ["one\n", "two\n", "three\n"] {
            harness.store.save_page("Foo", text, None, "").expect("save");
        }
        harness
    }

    #[test]
    fn snapshot_supports_read_only_modes() {
        let harness = seeded();
        let ctx = harness.context(Actor::admin("root"));
        let page = HistoryPage::load(&ctx, "Foo", "1").expect("page");
        assert!(page.is_valid());
        assert!(page.is_old());
        for mode in [Mode::Content, Mode::Display, Mode::Remove, Mode::Diff] {
            assert!(page.allows(&ctx, mode).expect("allows"), "{mode} allowed");
        }
        for mode in [Mode::Edit, Mode::History, Mode::Lock, Mode::Unlock, Mode::Block] {
            assert!(!page.allows(&ctx, mode).expect("allows"), "{mode} denied");
        }
        assert!(crate::error::is_unsupported(
            &page.lock(&ctx).expect_err("snapshots cannot lock")
        ));
    }

    #[test]
    fn snapshot_diffs_against_its_predecessor() {
        let harness = seeded();
        let ctx = harness.context(Actor::anonymous());
        let page = HistoryPage::load(&ctx, "Foo", "2").expect("page");
        let diff = page.diff(&ctx, None).expect("diff");
        assert!(diff.contains("--- Foo (version 1)"));
        assert!(diff.contains("-one\n"));
        assert!(diff.contains("+two\n"));
    }

    #[test]
    fn snapshot_content_and_remove_target() {
        let harness = seeded();
        let ctx = harness.context(Actor::user("alice"));
        let page = HistoryPage::load(&ctx, "Foo", "2").expect("page");
        assert_eq!(
            page.render(&ctx, Mode::Content, &FormData::new()).expect("content"),
            Response::Content("two\n".to_string())
        );
        assert_eq!(
            page.remove(&ctx).expect("remove"),
            Response::Redirect("/DeletePage?referrer=Foo&version=2".to_string())
        );
    }

    #[test]
    fn unknown_version_is_invalid() {
        let harness = seeded();
        let ctx = harness.context(Actor::anonymous());
        let page = HistoryPage::load(&ctx, "Foo", "42").expect("page");
        assert!(!page.is_valid());
        let error = page.display_contents(&ctx, false).expect_err("missing");
        assert_eq!(
            error.downcast_ref::<PageError>(),
            Some(&PageError::InvalidVersion {
                page: "Foo".to_string(),
                version: "42".to_string()
            })
        );
    }
}
