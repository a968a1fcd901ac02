use anyhow::Result;
use similar::TextDiff;
use tracing::info;

use super::{DELETE_PAGE_NAME, Page, Response};
use crate::context::WikiContext;
use crate::error::PageError;
use crate::mode::Mode;
use crate::store::{HistoryEntry, PageRecord, SaveOutcome};

const SUPPORTED: &[Mode] = &[
    Mode::Content,
    Mode::Display,
    Mode::Edit,
    Mode::Remove,
    Mode::History,
    Mode::Diff,
    Mode::Lock,
    Mode::Unlock,
    Mode::Block,
];

/// The live version of a stored page.
#[derive(Debug, Clone)]
pub struct StandardPage {
    name: String,
    record: Option<PageRecord>,
}

impl StandardPage {
    pub fn load(ctx: &WikiContext<'_>, name: &str) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            record: ctx.store.load_page(name)?,
        })
    }

    fn loaded(&self) -> Result<&PageRecord> {
        self.record
            .as_ref()
            .ok_or_else(|| PageError::NotFound(self.name.clone()).into())
    }
}

impl Page for StandardPage {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_modes(&self) -> &'static [Mode] {
        SUPPORTED
    }

    fn record(&self) -> Option<&PageRecord> {
        self.record.as_ref()
    }

    fn history(&self, ctx: &WikiContext<'_>) -> Result<Vec<HistoryEntry>> {
        ctx.store.history(&self.name)
    }

    fn diff(&self, ctx: &WikiContext<'_>, against: Option<&str>) -> Result<String> {
        unified_diff(self, ctx, self.loaded()?, against)
    }

    fn lock(&self, ctx: &WikiContext<'_>) -> Result<()> {
        let owner = ctx.actor.user.as_deref().unwrap_or("guest");
        ctx.store.set_locked(&self.name, Some(owner))?;
        info!(page = %self.name, owner, "locked page");
        Ok(())
    }

    fn unlock(&self, ctx: &WikiContext<'_>) -> Result<()> {
        ctx.store.set_locked(&self.name, None)?;
        info!(page = %self.name, "unlocked page");
        Ok(())
    }

    fn update_text(&self, ctx: &WikiContext<'_>, text: &str, changelog: &str) -> Result<SaveOutcome> {
        self.loaded()?;
        let outcome = ctx
            .store
            .save_page(&self.name, text, ctx.actor.user.as_deref(), changelog)?;
        info!(page = %self.name, version = outcome.version(), "updated page text");
        Ok(outcome)
    }

    fn display_contents(&self, ctx: &WikiContext<'_>, is_block: bool) -> Result<String> {
        let record = self.loaded()?;
        if !is_block {
            ctx.store.record_hit(&self.name)?;
        }
        let processor = self.processor(ctx, ctx.output)?;
        ctx.markup.render(&processor, &record.text)
    }

    fn remove(&self, ctx: &WikiContext<'_>) -> Result<Response> {
        self.loaded()?;
        Ok(Response::Redirect(
            ctx.urls
                .page(DELETE_PAGE_NAME)
                .with("referrer", &self.name)
                .render(false),
        ))
    }
}

/// Unified line diff from `against` (or the previous version) to `record`.
pub(super) fn unified_diff(
    page: &dyn Page,
    ctx: &WikiContext<'_>,
    record: &PageRecord,
    against: Option<&str>,
) -> Result<String> {
    let base_version = match against.filter(|version| !version.is_empty()) {
        Some(version) => Some(version.to_string()),
        None => page.previous_version(ctx)?,
    };
    let (base_label, base_text) = match base_version {
        Some(version) => {
            let base = ctx
                .store
                .load_version(&record.name, &version)?
                .ok_or_else(|| PageError::InvalidVersion {
                    page: record.name.clone(),
                    version: version.clone(),
                })?;
            (format!("{} (version {})", record.name, base.version), base.text)
        }
        None => (format!("{} (no previous version)", record.name), String::new()),
    };
    let target_label = format!("{} (version {})", record.name, record.version);
    let diff = TextDiff::from_lines(base_text.as_str(), record.text.as_str());
    let rendered = diff
        .unified_diff()
        .context_radius(3)
        .header(&base_label, &target_label)
        .to_string();
    Ok(rendered)
}
