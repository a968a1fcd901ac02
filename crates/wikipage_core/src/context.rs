use anyhow::Result;

use crate::config::WikiConfig;
use crate::identity::IdentityService;
use crate::markup::{Dialect, MarkupEngine, OutputFormat};
use crate::notify::{Mailer, Notifier};
use crate::page::SpecialPages;
use crate::perms::{Actor, PermissionsService};
use crate::store::PageStore;
use crate::url::WikiUrls;
use crate::view::ViewRenderer;

/// Everything one request needs: who is asking and the collaborators that
/// answer for permissions, storage, identity, rendering and delivery.
pub struct WikiContext<'a> {
    pub config: &'a WikiConfig,
    pub actor: Actor,
    pub perms: &'a dyn PermissionsService,
    pub store: &'a dyn PageStore,
    pub identity: &'a dyn IdentityService,
    pub view: &'a dyn ViewRenderer,
    pub markup: &'a dyn MarkupEngine,
    pub notifier: &'a dyn Notifier,
    pub mailer: &'a dyn Mailer,
    pub urls: &'a WikiUrls,
    pub specials: SpecialPages,
    pub output: OutputFormat,
}

impl WikiContext<'_> {
    pub fn dialect(&self) -> Result<Dialect> {
        self.config.wiki.format_name().parse()
    }

    pub fn home_page(&self) -> &str {
        self.config.wiki.home_page()
    }

    pub fn app_name(&self) -> String {
        self.config.wiki.app_name()
    }
}
