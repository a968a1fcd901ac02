//! Page handlers and the resolver that picks one for a request.
//!
//! Every handler implements [`Page`]. Operations a handler does not support
//! fail with [`PageError::Unsupported`]; callers gate them with
//! [`Page::allows`] first.

mod add;
mod delete;
mod history;
mod standard;

use std::collections::BTreeMap;
use std::fmt::Write as _;

use anyhow::Result;
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::context::WikiContext;
use crate::error::PageError;
use crate::form::FormData;
use crate::markup::{LinkConf, OutputFormat, Processor, build_processor};
use crate::mode::Mode;
use crate::perms::{ResolvedPermissions, decide, decide_create, resolve_permissions};
use crate::store::{HistoryEntry, PageRecord, SaveOutcome, same_version};
use crate::url::PageUrl;

pub use add::AddPage;
pub use delete::{DeletePage, DeletionScope, DeletionState, DELETE_PAGE_NAME};
pub use history::HistoryPage;
pub use standard::StandardPage;

const FALLBACK_DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Outcome of rendering a page or handling its action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Response {
    Content(String),
    Redirect(String),
}

/// Listing row for a page version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageSummary {
    pub name: String,
    pub url: String,
    pub version: String,
    pub author: String,
    pub date: String,
    pub timestamp: i64,
}

pub trait Page {
    fn name(&self) -> &str;
    fn supported_modes(&self) -> &'static [Mode];

    /// Loaded version record, if this page is backed by one.
    fn record(&self) -> Option<&PageRecord> {
        None
    }

    fn referrer(&self) -> Option<&str> {
        None
    }

    fn is_old(&self) -> bool {
        false
    }

    fn page_title(&self) -> String {
        self.name().to_string()
    }

    /// Page whose permission entry gates this handler.
    fn permission_target(&self) -> &str {
        self.name()
    }

    fn is_valid(&self) -> bool {
        self.record().is_some()
    }

    fn is_locked(&self) -> bool {
        self.record()
            .is_some_and(|record| record.locked_by.is_some())
    }

    fn version(&self) -> Result<&str> {
        match self.record() {
            Some(record) => Ok(&record.version),
            None => Err(PageError::unsupported("version", self.name()).into()),
        }
    }

    fn version_created(&self) -> Result<i64> {
        match self.record() {
            Some(record) => Ok(record.modified_at),
            None => Err(PageError::unsupported("version_created", self.name()).into()),
        }
    }

    fn hits(&self) -> Result<u64> {
        match self.record() {
            Some(record) => Ok(record.hits),
            None => Err(PageError::unsupported("hits", self.name()).into()),
        }
    }

    fn text(&self) -> Result<&str> {
        match self.record() {
            Some(record) => Ok(&record.text),
            None => Err(PageError::unsupported("text", self.name()).into()),
        }
    }

    fn history(&self, _ctx: &WikiContext<'_>) -> Result<Vec<HistoryEntry>> {
        Err(PageError::unsupported("history", self.name()).into())
    }

    fn diff(&self, _ctx: &WikiContext<'_>, _against: Option<&str>) -> Result<String> {
        Err(PageError::unsupported("diff", self.name()).into())
    }

    fn lock(&self, _ctx: &WikiContext<'_>) -> Result<()> {
        Err(PageError::unsupported("lock", self.name()).into())
    }

    fn unlock(&self, _ctx: &WikiContext<'_>) -> Result<()> {
        Err(PageError::unsupported("unlock", self.name()).into())
    }

    fn update_text(
        &self,
        _ctx: &WikiContext<'_>,
        _text: &str,
        _changelog: &str,
    ) -> Result<SaveOutcome> {
        Err(PageError::unsupported("update_text", self.name()).into())
    }

    fn display_contents(&self, _ctx: &WikiContext<'_>, _is_block: bool) -> Result<String> {
        Err(PageError::unsupported("display_contents", self.name()).into())
    }

    fn remove(&self, _ctx: &WikiContext<'_>) -> Result<Response> {
        Err(PageError::unsupported("remove", self.name()).into())
    }

    fn handle_action(&self, _ctx: &WikiContext<'_>, _form: &FormData) -> Result<Response> {
        Err(PageError::unsupported("handle_action", self.name()).into())
    }

    /// Hook run before rendering; a returned response replaces the render.
    fn pre_display(
        &self,
        _ctx: &WikiContext<'_>,
        _mode: Mode,
        _form: &FormData,
    ) -> Result<Option<Response>> {
        Ok(None)
    }

    fn supports(&self, mode: Mode) -> bool {
        self.supported_modes().contains(&mode)
    }

    fn permissions(&self, ctx: &WikiContext<'_>) -> Result<ResolvedPermissions> {
        resolve_permissions(ctx.perms, ctx.store, &ctx.actor, self.permission_target())
    }

    fn allows(&self, ctx: &WikiContext<'_>, mode: Mode) -> Result<bool> {
        if mode == Mode::Create {
            return Ok(decide_create(ctx.perms, &ctx.actor));
        }
        let resolved = self.permissions(ctx)?;
        Ok(decide(mode, resolved.bits, &ctx.actor, self.supports(mode)))
    }

    /// Display name of the version's author, `Guest` when anonymous.
    fn author(&self, ctx: &WikiContext<'_>) -> String {
        match self.record().and_then(|record| record.author.as_deref()) {
            Some(user) => ctx
                .identity
                .display_name(user)
                .unwrap_or_else(|| user.to_string()),
            None => "Guest".to_string(),
        }
    }

    fn format_version_created(&self, ctx: &WikiContext<'_>) -> String {
        let timestamp = self
            .record()
            .map(|record| record.modified_at)
            .filter(|timestamp| *timestamp > 0);
        match timestamp {
            Some(timestamp) => format_timestamp(timestamp, ctx.config.wiki.date_format())
                .unwrap_or_else(|| "Never".to_string()),
            None => "Never".to_string(),
        }
    }

    /// Version preceding this one, scanning the prior-version history.
    fn previous_version(&self, ctx: &WikiContext<'_>) -> Result<Option<String>> {
        let current = self.version()?.to_string();
        let history = ctx.store.history(self.name())?;
        if !self.is_old() {
            return Ok(history.into_iter().next().map(|entry| entry.version));
        }
        let position = history.iter().position(|entry| entry.version == current);
        Ok(position
            .and_then(|index| history.get(index + 1))
            .map(|entry| entry.version.clone()))
    }

    /// URL of this page, or of `link_page` with this page passed as `page`.
    fn page_url(
        &self,
        ctx: &WikiContext<'_>,
        link_page: Option<&str>,
        action_id: Option<&str>,
    ) -> PageUrl {
        let url = match link_page {
            Some(target) => ctx.urls.page(target).with("page", self.name()),
            None => ctx.urls.page(self.name()),
        };
        url.with_opt("referrer", self.referrer())
            .with_opt("actionID", action_id)
    }

    /// Processor configured for this page's links.
    fn processor(&self, ctx: &WikiContext<'_>, output: OutputFormat) -> Result<Processor> {
        let view_url = ctx.urls.link_template(self.name(), output.full_links());
        let new_url = if self.allows(ctx, Mode::Create)? {
            Some(view_url.clone())
        } else {
            None
        };
        let links = LinkConf {
            pages: ctx.store.page_names()?,
            view_url,
            new_url,
        };
        Ok(build_processor(ctx.dialect()?, output, &links))
    }

    /// Title header followed by the page contents.
    fn display(&self, ctx: &WikiContext<'_>, _form: &FormData) -> Result<Response> {
        let inner = self.display_contents(ctx, false)?;
        let mut vars = json!({
            "name": self.name(),
            "title": self.page_title(),
            "is_old": self.is_old(),
            "locked": self.is_locked(),
            "referrer": self.referrer(),
        });
        if let Ok(version) = self.version() {
            vars["version"] = json!(version);
            vars["modified"] = json!(format!(
                "Last Modified {} by {}",
                self.format_version_created(ctx),
                self.author(ctx)
            ));
        }
        let header = ctx.view.render("display/title", &vars)?;
        Ok(Response::Content(header + &inner))
    }

    fn block(&self, ctx: &WikiContext<'_>) -> Result<String> {
        self.display_contents(ctx, true)
    }

    fn render_history(&self, ctx: &WikiContext<'_>) -> Result<String> {
        let entries = self.history(ctx)?;
        let vars = json!({
            "name": self.name(),
            "current": self.version().ok(),
            "entries": entries,
        });
        ctx.view.render("history", &vars)
    }

    fn render(&self, ctx: &WikiContext<'_>, mode: Mode, form: &FormData) -> Result<Response> {
        match mode {
            Mode::Content => Ok(Response::Content(self.display_contents(ctx, false)?)),
            Mode::Display => self.display(ctx, form),
            Mode::Block => Ok(Response::Content(self.block(ctx)?)),
            Mode::Remove => self.remove(ctx),
            Mode::History => Ok(Response::Content(self.render_history(ctx)?)),
            Mode::Diff => Ok(Response::Content(self.diff(ctx, form.get("v1"))?)),
            other => Err(PageError::unsupported(other.as_str(), self.name()).into()),
        }
    }

    fn to_summary(&self, ctx: &WikiContext<'_>) -> Result<PageSummary> {
        Ok(PageSummary {
            name: self.name().to_string(),
            url: self.page_url(ctx, None, None).render(false),
            version: self.version()?.to_string(),
            author: self.author(ctx),
            date: self.format_version_created(ctx),
            timestamp: self.version_created()?,
        })
    }
}

fn format_timestamp(timestamp: i64, pattern: &str) -> Option<String> {
    let local = DateTime::from_timestamp(timestamp, 0)?.with_timezone(&Local);
    let mut out = String::new();
    if write!(out, "{}", local.format(pattern)).is_ok() {
        return Some(out);
    }
    out.clear();
    write!(out, "{}", local.format(FALLBACK_DATE_FORMAT)).ok()?;
    Some(out)
}

type SpecialFactory = fn(Option<&str>) -> Box<dyn Page>;

fn delete_page(referrer: Option<&str>) -> Box<dyn Page> {
    Box::new(DeletePage::new(referrer))
}

/// Named pages with their own behavior, looked up before the store.
#[derive(Clone)]
pub struct SpecialPages {
    factories: BTreeMap<&'static str, SpecialFactory>,
}

impl SpecialPages {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    pub fn builtin() -> Self {
        Self::empty().register(DELETE_PAGE_NAME, delete_page)
    }

    pub fn register(mut self, name: &'static str, factory: SpecialFactory) -> Self {
        self.factories.insert(name, factory);
        self
    }

    /// Builds the special page called `name`. Names containing `/` never match.
    pub fn build(&self, name: &str, referrer: Option<&str>) -> Option<Box<dyn Page>> {
        if name.contains('/') {
            return None;
        }
        self.factories.get(name).map(|factory| factory(referrer))
    }
}

impl Default for SpecialPages {
    fn default() -> Self {
        Self::builtin()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    Live,
    Snapshot,
    CreatePrompt,
}

/// Which handler serves a stored page.
///
/// A requested version equal to the live one is served live. Without a
/// version, a missing page becomes a create prompt only for actors who may
/// edit it.
pub fn select_page_kind(
    requested_version: Option<&str>,
    live_version: Option<&str>,
    may_edit: bool,
) -> PageKind {
    match requested_version.filter(|version| !version.is_empty()) {
        Some(requested) if live_version.is_some_and(|live| same_version(requested, live)) => {
            PageKind::Live
        }
        Some(_) => PageKind::Snapshot,
        None if live_version.is_some() || !may_edit => PageKind::Live,
        None => PageKind::CreatePrompt,
    }
}

pub enum ResolvedPage {
    Special(Box<dyn Page>),
    Live(StandardPage),
    Snapshot(HistoryPage),
    Create(AddPage),
}

impl ResolvedPage {
    pub fn as_page(&self) -> &dyn Page {
        match self {
            Self::Special(page) => page.as_ref(),
            Self::Live(page) => page,
            Self::Snapshot(page) => page,
            Self::Create(page) => page,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Special(_) => "special",
            Self::Live(_) => "live",
            Self::Snapshot(_) => "snapshot",
            Self::Create(_) => "create",
        }
    }
}

/// Resolve the handler for `name`, optionally at `version`.
pub fn get_page(
    ctx: &WikiContext<'_>,
    name: &str,
    version: Option<&str>,
    referrer: Option<&str>,
) -> Result<ResolvedPage> {
    let name = if name.is_empty() { ctx.home_page() } else { name };

    if let Some(page) = ctx.specials.build(name, referrer) {
        debug!(page = name, kind = "special", "resolved page");
        return Ok(ResolvedPage::Special(page));
    }

    let live = StandardPage::load(ctx, name)?;
    let requested = version.filter(|version| !version.is_empty());
    let may_edit = if requested.is_none() && !live.is_valid() {
        live.allows(ctx, Mode::Edit)?
    } else {
        false
    };
    let live_version = live.record().map(|record| record.version.as_str());
    let kind = select_page_kind(requested, live_version, may_edit);
    debug!(page = name, version = ?requested, kind = ?kind, "resolved page");

    Ok(match (kind, requested) {
        (PageKind::Snapshot, Some(requested)) => {
            ResolvedPage::Snapshot(HistoryPage::load(ctx, name, requested)?)
        }
        (PageKind::CreatePrompt, _) => ResolvedPage::Create(AddPage::new(name)),
        _ => ResolvedPage::Live(live),
    })
}

/// Resolve the page named by the request form.
pub fn current_page(ctx: &WikiContext<'_>, form: &FormData) -> Result<ResolvedPage> {
    let name = form.get("page").unwrap_or_default().trim_end_matches('/');
    get_page(ctx, name, form.get("version"), form.get("referrer"))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::config::WikiConfig;
    use crate::context::WikiContext;
    use crate::identity::ConfigIdentities;
    use crate::markup::{OutputFormat, PassthroughEngine};
    use crate::notify::{Mail, Mailer, NoticeQueue};
    use crate::perms::{Actor, TablePermissions};
    use crate::store::SqlitePageStore;
    use crate::url::WikiUrls;
    use crate::view::PlainView;

    use super::SpecialPages;

    #[derive(Default)]
    pub struct RecordingMailer {
        pub sent: std::cell::RefCell<Vec<Mail>>,
    }

    impl Mailer for RecordingMailer {
        fn send(&self, mail: &Mail) -> anyhow::Result<()> {
            self.sent.borrow_mut().push(mail.clone());
            Ok(())
        }
    }

    pub struct Harness {
        pub config: WikiConfig,
        pub perms: TablePermissions,
        pub store: SqlitePageStore,
        pub identity: ConfigIdentities,
        pub notices: NoticeQueue,
        pub mailer: RecordingMailer,
        pub urls: WikiUrls,
    }

    impl Harness {
        pub fn new() -> Self {
            let config = WikiConfig::default();
            Self {
                identity: ConfigIdentities::from_config(&config),
                config,
                perms: TablePermissions::default(),
                store: SqlitePageStore::open_in_memory().expect("store"),
                notices: NoticeQueue::default(),
                mailer: RecordingMailer::default(),
                urls: WikiUrls::new("http://wiki.test").expect("urls"),
            }
        }

        pub fn context(&self, actor: Actor) -> WikiContext<'_> {
            WikiContext {
                config: &self.config,
                actor,
                perms: &self.perms,
                store: &self.store,
                identity: &self.identity,
                view: &PlainView,
                markup: &PassthroughEngine,
                notifier: &self.notices,
                mailer: &self.mailer,
                urls: &self.urls,
                specials: SpecialPages::builtin(),
                output: OutputFormat::Plain,
            }
        }
    }
}
