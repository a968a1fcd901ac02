use anyhow::{Result, bail};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use super::{Page, Response, get_page};
use crate::context::WikiContext;
use crate::form::FormData;
use crate::mode::Mode;
use crate::notify::{Mail, Notice};

pub const DELETE_PAGE_NAME: &str = "DeletePage";

const SUPPORTED: &[Mode] = &[Mode::Display];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", content = "version", rename_all = "snake_case")]
pub enum DeletionScope {
    AllVersions,
    Version(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeletionState {
    AwaitingConfirmation {
        page: String,
        scope: DeletionScope,
        message: String,
        locked: bool,
    },
    Deleted {
        page: String,
        scope: DeletionScope,
    },
    Denied {
        page: String,
    },
}

/// Confirmation form and action for deleting the referring page.
///
/// Permissions are always evaluated against the referrer, never against
/// `DeletePage` itself.
#[derive(Debug, Clone)]
pub struct DeletePage {
    referrer: Option<String>,
}

impl DeletePage {
    pub fn new(referrer: Option<&str>) -> Self {
        Self {
            referrer: referrer
                .filter(|name| !name.is_empty())
                .map(str::to_string),
        }
    }

    fn target(&self) -> Result<&str> {
        match self.referrer.as_deref() {
            Some(name) => Ok(name),
            None => bail!("{DELETE_PAGE_NAME} needs a referrer page"),
        }
    }

    /// Confirmation state for the referrer, `None` when it cannot be loaded.
    pub fn confirmation(
        &self,
        ctx: &WikiContext<'_>,
        version: Option<&str>,
    ) -> Result<Option<DeletionState>> {
        let target = get_page(ctx, self.target()?, version, None)?;
        let page = target.as_page();
        if !page.is_valid() {
            return Ok(None);
        }
        let (scope, message) = match version.filter(|version| !version.is_empty()) {
            None => (
                DeletionScope::AllVersions,
                "Are you sure you want to delete this page? All versions will be permanently removed."
                    .to_string(),
            ),
            Some(_) => {
                let version = page.version()?.to_string();
                let message =
                    format!("Are you sure you want to delete version {version} of this page?");
                (DeletionScope::Version(version), message)
            }
        };
        Ok(Some(DeletionState::AwaitingConfirmation {
            page: page.name().to_string(),
            scope,
            message,
            locked: page.is_locked(),
        }))
    }

    /// Deletes the referrer (or one of its versions) when the actor may remove it.
    pub fn perform(&self, ctx: &WikiContext<'_>, version: Option<&str>) -> Result<DeletionState> {
        let name = self.target()?;
        let target = get_page(ctx, name, None, None)?;
        if !target.as_page().allows(ctx, Mode::Remove)? {
            ctx.notifier.push(Notice::warning(format!(
                "You don't have permission to delete \"{name}\"."
            )));
            warn!(page = name, actor = ?ctx.actor.user, "deletion denied");
            return Ok(DeletionState::Denied {
                page: name.to_string(),
            });
        }

        let app = ctx.app_name();
        let scope = match version.filter(|version| !version.is_empty()) {
            None => {
                ctx.store.remove_all_versions(name)?;
                ctx.notifier
                    .push(Notice::success(format!("Successfully deleted \"{name}\".")));
                send_mail(
                    ctx,
                    Mail {
                        subject: format!("[{app}] deleted: {name}"),
                        body: format!("Deleted page: {name}\n"),
                    },
                );
                DeletionScope::AllVersions
            }
            Some(version) => {
                ctx.store.remove_version(name, version)?;
                ctx.notifier.push(Notice::success(format!(
                    "Deleted version {version} of \"{name}\"."
                )));
                send_mail(
                    ctx,
                    Mail {
                        subject: format!("[{app}] deleted: {name} [{version}]"),
                        body: format!("Deleted version: {version} of {name}\n"),
                    },
                );
                DeletionScope::Version(version.to_string())
            }
        };
        info!(page = name, scope = ?scope, actor = ?ctx.actor.user, "deleted page");
        Ok(DeletionState::Deleted {
            page: name.to_string(),
            scope,
        })
    }

    fn full_url(ctx: &WikiContext<'_>, page: &str) -> String {
        ctx.urls.page(page).render(true)
    }
}

/// Runs after the store change has committed; delivery failures are only logged.
fn send_mail(ctx: &WikiContext<'_>, mail: Mail) {
    if let Err(error) = ctx.mailer.send(&mail) {
        warn!(subject = %mail.subject, error = %format!("{error:#}"), "failed to send deletion mail");
    }
}

impl Page for DeletePage {
    fn name(&self) -> &str {
        DELETE_PAGE_NAME
    }

    fn supported_modes(&self) -> &'static [Mode] {
        SUPPORTED
    }

    fn referrer(&self) -> Option<&str> {
        self.referrer.as_deref()
    }

    fn page_title(&self) -> String {
        "Delete Page".to_string()
    }

    fn permission_target(&self) -> &str {
        self.referrer.as_deref().unwrap_or_default()
    }

    fn pre_display(
        &self,
        ctx: &WikiContext<'_>,
        _mode: Mode,
        _form: &FormData,
    ) -> Result<Option<Response>> {
        let name = self.target()?;
        let target = get_page(ctx, name, None, None)?;
        if target.as_page().allows(ctx, Mode::Remove)? {
            return Ok(None);
        }
        Ok(Some(Response::Redirect(Self::full_url(ctx, name))))
    }

    fn display(&self, ctx: &WikiContext<'_>, form: &FormData) -> Result<Response> {
        let version = form.get("version");
        let Some(DeletionState::AwaitingConfirmation {
            page,
            scope,
            message,
            locked,
        }) = self.confirmation(ctx, version)?
        else {
            return Ok(Response::Redirect(Self::full_url(ctx, ctx.home_page())));
        };
        let version = match &scope {
            DeletionScope::AllVersions => None,
            DeletionScope::Version(version) => Some(version.as_str()),
        };
        let vars = json!({
            "title": format!("{}: {page}", self.page_title()),
            "message": message,
            "page": page,
            "version": version,
            "locked": locked,
            "action_url": ctx
                .urls
                .page(DELETE_PAGE_NAME)
                .with("actionID", "special")
                .with("referrer", &page)
                .with_opt("version", version)
                .render(false),
            "cancel_url": ctx.urls.page(&page).render(false),
        });
        Ok(Response::Content(ctx.view.render("delete/confirm", &vars)?))
    }

    fn handle_action(&self, ctx: &WikiContext<'_>, form: &FormData) -> Result<Response> {
        let redirect = match self.perform(ctx, form.get("version"))? {
            DeletionState::Deleted {
                scope: DeletionScope::AllVersions,
                ..
            } => Self::full_url(ctx, ctx.home_page()),
            DeletionState::Deleted { page, .. } | DeletionState::Denied { page } => {
                Self::full_url(ctx, &page)
            }
            DeletionState::AwaitingConfirmation { page, .. } => Self::full_url(ctx, &page),
        };
        Ok(Response::Redirect(redirect))
    }
}
