use std::cell::RefCell;

use tempfile::{TempDir, tempdir};
use wikipage_core::config::WikiConfig;
use wikipage_core::context::WikiContext;
use wikipage_core::form::FormData;
use wikipage_core::identity::ConfigIdentities;
use wikipage_core::markup::{OutputFormat, PassthroughEngine};
use wikipage_core::mode::Mode;
use wikipage_core::notify::{Mail, Mailer, NoticeLevel, NoticeQueue};
use wikipage_core::page::{
    AddPage, DELETE_PAGE_NAME, DeletePage, HistoryPage, Page, ResolvedPage, Response,
    SpecialPages, StandardPage, get_page,
};
use wikipage_core::perms::{Actor, PermissionSet, PermissionsService};
use wikipage_core::store::{PageStore, SqlitePageStore};
use wikipage_core::url::WikiUrls;
use wikipage_core::view::PlainView;

/// Grants the same bits for every registry entry.
struct FixedBits(PermissionSet);

impl PermissionsService for FixedBits {
    fn exists(&self, _name: &str) -> bool {
        true
    }

    fn permissions(&self, _name: &str, _user: Option<&str>) -> PermissionSet {
        self.0
    }
}

#[derive(Default)]
struct OutboxSpy {
    sent: RefCell<Vec<Mail>>,
}

impl Mailer for OutboxSpy {
    fn send(&self, mail: &Mail) -> anyhow::Result<()> {
        self.sent.borrow_mut().push(mail.clone());
        Ok(())
    }
}

struct Wiki {
    _temp: TempDir,
    config: WikiConfig,
    perms: FixedBits,
    store: SqlitePageStore,
    identity: ConfigIdentities,
    notices: NoticeQueue,
    mailer: OutboxSpy,
    urls: WikiUrls,
}

impl Wiki {
    fn new(bits: PermissionSet) -> Self {
        let temp = tempdir().expect("tempdir");
        let store = SqlitePageStore::open(&temp.path().join("wiki.db")).expect("open store");
        let config = WikiConfig::default();
        Self {
            _temp: temp,
            identity: ConfigIdentities::from_config(&config),
            config,
            perms: FixedBits(bits),
            store,
            notices: NoticeQueue::default(),
            mailer: OutboxSpy::default(),
            urls: WikiUrls::new("https://wiki.example/").expect("urls"),
        }
    }

    fn seeded(bits: PermissionSet, name: &str, versions: usize) -> Self {
        let wiki = Self::new(bits);
        for n in 1..=versions {
            wiki.store
                .save_page(name, &format!("revision {n}\n"), Some("alice"), "")
                .expect("save");
        }
        wiki
    }

    fn context(&self, actor: Actor) -> WikiContext<'_> {
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

fn every_bitmask() -> impl Iterator<Item = PermissionSet> {
    (0..=PermissionSet::ALL.bits()).map(PermissionSet::from_bits)
}

#[test]
fn administrators_get_every_supported_mode_for_any_bitmask() {
    for bits in every_bitmask() {
        let wiki = Wiki::seeded(bits, "Foo", 2);
        let ctx = wiki.context(Actor::admin("root"));
        let pages: Vec<Box<dyn Page>> = vec![
            Box::new(StandardPage::load(&ctx, "Foo").expect("live")),
            Box::new(HistoryPage::load(&ctx, "Foo", "1").expect("snapshot")),
            Box::new(AddPage::new("Missing")),
            Box::new(DeletePage::new(Some("Foo"))),
        ];
        for page in &pages {
            for mode in Mode::ALL.into_iter().filter(|mode| *mode != Mode::Create) {
                assert_eq!(
                    page.allows(&ctx, mode).expect("allows"),
                    page.supports(mode),
                    "bits={bits} page={} mode={mode}",
                    page.name()
                );
            }
            assert!(page.allows(&ctx, Mode::Create).expect("allows"));
        }
    }
}

#[test]
fn robots_are_refused_mutating_modes() {
    let wiki = Wiki::seeded(PermissionSet::ALL, "Foo", 1);
    for actor in [
        Actor {
            is_robot: true,
            ..Actor::user("spider")
        },
        Actor {
            is_robot: true,
            ..Actor::admin("root")
        },
    ] {
        let ctx = wiki.context(actor);
        let page = StandardPage::load(&ctx, "Foo").expect("live");
        assert!(!page.allows(&ctx, Mode::Edit).expect("allows"));
        assert!(!page.allows(&ctx, Mode::Remove).expect("allows"));
        assert!(!page.allows(&ctx, Mode::Create).expect("allows"));
        assert!(page.allows(&ctx, Mode::Display).expect("allows"));
    }
}

#[test]
fn read_only_bitmask_denies_edit_on_every_page_type() {
    let wiki = Wiki::seeded(PermissionSet::READ, "Wiki/Home", 1);
    let ctx = wiki.context(Actor::user("alice"));
    let live = StandardPage::load(&ctx, "Wiki/Home").expect("live");
    assert!(live.supports(Mode::Edit));
    assert!(!live.allows(&ctx, Mode::Edit).expect("allows"));
    assert!(live.allows(&ctx, Mode::Display).expect("allows"));

    let snapshot = HistoryPage::load(&ctx, "Wiki/Home", "1").expect("snapshot");
    assert!(!snapshot.allows(&ctx, Mode::Edit).expect("allows"));
    assert!(!AddPage::new("Wiki/Home").allows(&ctx, Mode::Edit).expect("allows"));
}

#[test]
fn requested_version_matching_live_returns_live_page() {
    let wiki = Wiki::seeded(PermissionSet::ALL, "Foo", 3);
    let ctx = wiki.context(Actor::user("alice"));

    let page = get_page(&ctx, "Foo", Some("3"), None).expect("resolve");
    let ResolvedPage::Live(live) = &page else {
        panic!("expected the live page, got {}", page.kind_name());
    };
    assert!(!live.is_old());
    assert_eq!(live.version().expect("version"), "3");
}

#[test]
fn any_other_requested_version_returns_a_snapshot() {
    let wiki = Wiki::seeded(PermissionSet::ALL, "Foo", 3);
    let ctx = wiki.context(Actor::user("alice"));

    for requested in ["1", "2", "4", "x"] {
        let page = get_page(&ctx, "Foo", Some(requested), None).expect("resolve");
        let ResolvedPage::Snapshot(snapshot) = &page else {
            panic!("version {requested} resolved to {}", page.kind_name());
        };
        assert!(snapshot.is_old());
        assert_eq!(snapshot.requested_version(), requested);
        assert_eq!(snapshot.is_valid(), matches!(requested, "1" | "2"));
    }
    for requested in [None, Some("")] {
        let page = get_page(&ctx, "Foo", requested, None).expect("resolve");
        assert!(matches!(page, ResolvedPage::Live(_)));
    }
}

#[test]
fn deleting_one_version_keeps_the_rest_and_returns_to_the_page() {
    let wiki = Wiki::seeded(PermissionSet::ALL, "Foo", 3);
    let ctx = wiki.context(Actor::user("alice"));
    let page = get_page(&ctx, DELETE_PAGE_NAME, None, Some("Foo")).expect("resolve");
    let form = FormData::new()
        .with("actionID", "special")
        .with("referrer", "Foo")
        .with("version", "2");

    let response = page.as_page().handle_action(&ctx, &form).expect("delete");
    assert_eq!(
        response,
        Response::Redirect("https://wiki.example/Foo".to_string())
    );
    assert!(wiki.store.load_version("Foo", "2").expect("load").is_none());
    assert!(wiki.store.load_version("Foo", "1").expect("load").is_some());
    let live = wiki.store.load_page("Foo").expect("load").expect("live page");
    assert_eq!(live.version, "3");

    let sent = wiki.mailer.sent.borrow();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].subject.ends_with("deleted: Foo [2]"));
}

#[test]
fn deleting_without_a_version_removes_the_page_and_returns_home() {
    let wiki = Wiki::seeded(PermissionSet::ALL, "Foo", 3);
    let ctx = wiki.context(Actor::user("alice"));
    let page = get_page(&ctx, DELETE_PAGE_NAME, None, Some("Foo")).expect("resolve");
    let form = FormData::new()
        .with("actionID", "special")
        .with("referrer", "Foo");

    let response = page.as_page().handle_action(&ctx, &form).expect("delete");
    let home = wiki.urls.page(ctx.home_page()).render(true);
    assert_eq!(response, Response::Redirect(home));
    assert!(wiki.store.load_page("Foo").expect("load").is_none());
    assert!(wiki.store.history("Foo").expect("history").is_empty());

    let notices = wiki.notices.drain();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Success);
}

#[test]
fn unprivileged_deletion_never_touches_the_store() {
    let bits_without_delete = every_bitmask().filter(|bits| !bits.contains(PermissionSet::DELETE));
    for bits in bits_without_delete {
        let wiki = Wiki::seeded(bits, "Foo", 2);
        let ctx = wiki.context(Actor::user("mallory"));
        let page = get_page(&ctx, DELETE_PAGE_NAME, None, Some("Foo")).expect("resolve");

        for version in [None, Some("1"), Some("2")] {
            let mut form = FormData::new().with("referrer", "Foo");
            if let Some(version) = version {
                form.set("version", version);
            }
            let response = page.as_page().handle_action(&ctx, &form).expect("attempt");
            assert_eq!(
                response,
                Response::Redirect("https://wiki.example/Foo".to_string()),
                "bits={bits}"
            );

            let notices = wiki.notices.drain();
            assert_eq!(notices.len(), 1);
            assert_eq!(notices[0].level, NoticeLevel::Warning);
        }

        assert_eq!(wiki.store.history("Foo").expect("history").len(), 1);
        let live = wiki.store.load_page("Foo").expect("load").expect("live page");
        assert_eq!(live.version, "2");
        assert!(wiki.mailer.sent.borrow().is_empty());
    }
}

#[test]
fn confirmation_screen_redirects_actors_who_cannot_delete() {
    let wiki = Wiki::seeded(PermissionSet::SHOW | PermissionSet::READ, "Foo", 1);
    let ctx = wiki.context(Actor::user("mallory"));
    let page = get_page(&ctx, DELETE_PAGE_NAME, None, Some("Foo")).expect("resolve");
    let form = FormData::new().with("referrer", "Foo");

    let response = page
        .as_page()
        .pre_display(&ctx, Mode::Display, &form)
        .expect("pre display");
    assert_eq!(
        response,
        Some(Response::Redirect("https://wiki.example/Foo".to_string()))
    );
}
