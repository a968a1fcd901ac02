//! Permission bitmasks, actors and the mode gate.
//!
//! Resolution order for a page is: the page's own registry entry
//! (`wiki:pages:<id>`), then the wiki-wide entry (`wiki:pages`), then the
//! built-in anonymous/authenticated defaults. [`decide`] turns the resolved
//! bits into a yes/no for one mode.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::BitOr;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::debug;

use crate::config::{PermissionEntryConfig, WikiConfig};
use crate::mode::Mode;
use crate::store::PageStore;

pub const WIKI_PERMISSION: &str = "wiki:pages";

const ROBOT_AGENT_TOKENS: &[&str] = &[
    "googlebot",
    "bingbot",
    "adsbot",
    "applebot",
    "yandexbot",
    "duckduckbot",
    "ahrefsbot",
    "semrushbot",
    "crawler",
    "spider",
    "slurp",
    "archiver",
    "facebookexternalhit",
    "mediapartners-google",
    "wget",
    "curl/",
    "python-requests",
    "httrack",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct PermissionSet(u8);

impl PermissionSet {
    pub const NONE: Self = Self(0);
    pub const SHOW: Self = Self(2);
    pub const READ: Self = Self(4);
    pub const EDIT: Self = Self(8);
    pub const DELETE: Self = Self(16);
    pub const ALL: Self = Self(2 | 4 | 8 | 16);

    const NAMED: [(&'static str, PermissionSet); 4] = [
        ("show", Self::SHOW),
        ("read", Self::READ),
        ("edit", Self::EDIT),
        ("delete", Self::DELETE),
    ];

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True when every flag in `other` is set. The empty set is never "contained".
    pub const fn contains(self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut out = Self::NONE;
        for name in names {
            let lowered = name.as_ref().trim().to_ascii_lowercase();
            match Self::NAMED.iter().find(|(label, _)| *label == lowered) {
                Some((_, flag)) => out = out | *flag,
                None => bail!(
                    "unknown permission flag `{}` (expected show, read, edit or delete)",
                    name.as_ref()
                ),
            }
        }
        Ok(out)
    }

    pub fn names(self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(label, _)| *label)
            .collect()
    }
}

impl BitOr for PermissionSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.names();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

/// The party a request is made on behalf of.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Actor {
    pub user: Option<String>,
    pub is_admin: bool,
    pub is_robot: bool,
}

impl Actor {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self {
            user: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            user: Some(id.into()),
            is_admin: true,
            is_robot: false,
        }
    }

    /// Build an actor from request facts: admin status comes from the
    /// configured admin list, robot status from the user agent.
    pub fn from_request(user: Option<&str>, user_agent: Option<&str>, config: &WikiConfig) -> Self {
        let user = user
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        let is_admin = user
            .as_deref()
            .map(|id| config.wiki.is_admin(id))
            .unwrap_or(false);
        Self {
            user,
            is_admin,
            is_robot: user_agent.map(is_robot_agent).unwrap_or(false),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

/// Known crawler tokens, or `bot` as a product name (`ExampleBot/1.0`) or a
/// word of its own. `bot` inside a device name such as `CUBOT` does not count.
pub fn is_robot_agent(user_agent: &str) -> bool {
    let lowered = user_agent.to_ascii_lowercase();
    if ROBOT_AGENT_TOKENS.iter().any(|token| lowered.contains(token)) {
        return true;
    }
    lowered.match_indices("bot").any(|(at, _)| {
        let rest = &lowered[at + 3..];
        if rest.starts_with('/') {
            return true;
        }
        let joined_before = lowered[..at]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_alphanumeric());
        let joined_after = rest.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
        !joined_before && !joined_after
    })
}

/// Registry of named permission entries.
pub trait PermissionsService {
    fn exists(&self, name: &str) -> bool;
    fn permissions(&self, name: &str, user: Option<&str>) -> PermissionSet;

    fn has_permission(&self, name: &str, user: Option<&str>, flag: PermissionSet) -> bool {
        self.permissions(name, user).contains(flag)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionEntry {
    pub guest: PermissionSet,
    pub users: PermissionSet,
    pub per_user: BTreeMap<String, PermissionSet>,
}

impl PermissionEntry {
    fn for_user(&self, user: Option<&str>) -> PermissionSet {
        match user {
            Some(id) => self.per_user.get(id).copied().unwrap_or(self.users),
            None => self.guest,
        }
    }

    fn from_config(name: &str, config: &PermissionEntryConfig) -> Result<Self> {
        let mut per_user = BTreeMap::new();
        for (user, flags) in &config.user {
            per_user.insert(user.clone(), parse_entry_flags(name, flags)?);
        }
        Ok(Self {
            guest: parse_entry_flags(name, &config.guest)?,
            users: parse_entry_flags(name, &config.users)?,
            per_user,
        })
    }
}

fn parse_entry_flags(entry: &str, flags: &[String]) -> Result<PermissionSet> {
    PermissionSet::from_names(flags)
        .with_context(|| format!("in permission entry `{entry}`"))
}

/// Table-driven [`PermissionsService`] loaded from the `[permissions]` config section.
#[derive(Debug, Clone, Default)]
pub struct TablePermissions {
    entries: BTreeMap<String, PermissionEntry>,
}

impl TablePermissions {
    pub fn from_config(config: &WikiConfig) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for (name, entry) in &config.permissions {
            entries.insert(name.clone(), PermissionEntry::from_config(name, entry)?);
        }
        Ok(Self { entries })
    }

    pub fn with_entry(mut self, name: impl Into<String>, entry: PermissionEntry) -> Self {
        self.entries.insert(name.into(), entry);
        self
    }
}

impl PermissionsService for TablePermissions {
    fn exists(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    fn permissions(&self, name: &str, user: Option<&str>) -> PermissionSet {
        self.entries
            .get(name)
            .map(|entry| entry.for_user(user))
            .unwrap_or(PermissionSet::NONE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionSource {
    Page,
    Wiki,
    AnonymousDefault,
    AuthenticatedDefault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedPermissions {
    pub bits: PermissionSet,
    pub source: PermissionSource,
}

pub fn page_permission_name(page_id: i64) -> String {
    format!("{WIKI_PERMISSION}:{page_id}")
}

/// Effective bits for `actor` on `page_name`.
pub fn resolve_permissions(
    perms: &dyn PermissionsService,
    store: &dyn PageStore,
    actor: &Actor,
    page_name: &str,
) -> Result<ResolvedPermissions> {
    let user = actor.user.as_deref();
    let page_entry = store.page_id(page_name)?.map(page_permission_name);

    let resolved = match page_entry {
        Some(entry) if perms.exists(&entry) => ResolvedPermissions {
            bits: perms.permissions(&entry, user),
            source: PermissionSource::Page,
        },
        _ if perms.exists(WIKI_PERMISSION) => ResolvedPermissions {
            bits: perms.permissions(WIKI_PERMISSION, user),
            source: PermissionSource::Wiki,
        },
        _ if actor.is_authenticated() => ResolvedPermissions {
            bits: PermissionSet::ALL,
            source: PermissionSource::AuthenticatedDefault,
        },
        _ => ResolvedPermissions {
            bits: PermissionSet::SHOW | PermissionSet::READ,
            source: PermissionSource::AnonymousDefault,
        },
    };
    debug!(
        page = page_name,
        bits = %resolved.bits,
        source = ?resolved.source,
        "resolved page permissions"
    );
    Ok(resolved)
}

/// The flag a mode needs when the actor is not an administrator.
pub fn required_flag(mode: Mode) -> PermissionSet {
    match mode {
        Mode::Edit => PermissionSet::EDIT,
        Mode::Remove => PermissionSet::DELETE,
        _ => PermissionSet::READ,
    }
}

/// Gate for every page-scoped mode.
///
/// Precedence: robot check (mutating modes only), administrator override of
/// the bit check, bit check, then the page type's mode support.
pub fn decide(mode: Mode, bits: PermissionSet, actor: &Actor, supported: bool) -> bool {
    if mode.is_mutating() && actor.is_robot {
        return false;
    }
    if !actor.is_admin && !bits.contains(required_flag(mode)) {
        return false;
    }
    supported
}

/// Gate for [`Mode::Create`], which concerns the wiki rather than one page.
pub fn decide_create(perms: &dyn PermissionsService, actor: &Actor) -> bool {
    if actor.is_robot {
        return false;
    }
    if actor.is_admin {
        return true;
    }
    if perms.exists(WIKI_PERMISSION) {
        perms.has_permission(WIKI_PERMISSION, actor.user.as_deref(), PermissionSet::EDIT)
    } else {
        actor.is_authenticated()
    }
}
