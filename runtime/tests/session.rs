//! Session lifecycle against the simulated host.

use std::{
    io::{Read, Write},
    net::TcpStream,
    rc::Rc,
    sync::Arc,
};
use weft_model::{ContainerPolicy, MemorySource, Model};
use weft_runtime::{
    styles::PLACEHOLDER_PNG,
    testing::{MemoryModule, MockFactory, MockHandle, StartupOutcome, MOCK_ROOT},
    ElementId, Error, ModuleDescriptor, Rect, ResourceRegistry, ResourceServer, RuntimeConfig,
    Session, SessionRegistry,
};

const VERSION: &str = "2.2";

fn config() -> RuntimeConfig {
    RuntimeConfig {
        style_wait_ms: 200,
        image_wait_ms: 200,
        poll_interval_ms: 0,
        ..RuntimeConfig::default()
    }
}

fn registry_on(resources: Arc<ResourceRegistry>) -> (Rc<SessionRegistry>, MockHandle) {
    weft_log::test();
    let factory = MockFactory::new(resources.clone(), &[VERSION]);
    let state = factory.state();
    let registry = SessionRegistry::new(resources, vec![Box::new(factory)], config());
    (registry, state)
}

fn registry() -> (Rc<SessionRegistry>, MockHandle) {
    registry_on(Arc::new(ResourceRegistry::new("http://weft.test")))
}

fn mail() -> Arc<MemoryModule> {
    Arc::new(
        MemoryModule::new("com.example.Mail", VERSION)
            .with_style("Mail.css", "body{}")
            .with_script("Mail.nocache.js", "")
            .with_file("icon.png", "icon"),
    )
}

fn open(registry: &Rc<SessionRegistry>, module: &Arc<MemoryModule>) -> Session {
    let module: Arc<dyn ModuleDescriptor> = module.clone();
    match registry.open(Some(module)) {
        Ok(session) => session,
        Err(e) => panic!("open failed: {e}"),
    }
}

fn apply_url(css: &[u8]) -> String {
    let css = String::from_utf8_lossy(css);
    let start = css.find("url('").unwrap() + "url('".len();
    let end = css[start..].find('\'').unwrap();
    css[start..start + end].to_string()
}

#[test]
fn initialize_serves_bootstrap_and_loads_styles() {
    let (registry, state) = registry();
    let module = mail();
    let mut session = open(&registry, &module);
    session.initialize().unwrap();

    assert!(session.is_initialized());
    assert_eq!(session.module_base(), "/0/");
    assert_eq!(session.root_element(), Some(MOCK_ROOT));
    assert!(registry.resources().contains("/0/"));
    assert_eq!(registry.live(), [0]);

    let state = state.lock();
    assert_eq!(
        state.started_url.as_deref(),
        Some("http://weft.test/0/__start.html")
    );
    assert_eq!(state.viewport, Some((450, 300)));
    assert_eq!(state.activated, 1);
    assert_eq!(state.fetched[0], "/0/__start.html");
    assert_eq!(state.fetched[1], "/0/Mail.css");
    assert!(state.fetched[2].starts_with("/0/weft__wait_stylesheet_Mail_"));
    assert_eq!(state.count_calls("enable_scrolling"), 1);
}

#[test]
fn initialize_twice_is_rejected() {
    let (registry, _state) = registry();
    let mut session = open(&registry, &mail());
    session.initialize().unwrap();
    assert!(matches!(
        session.initialize(),
        Err(Error::AlreadyInitialized { index: 0 })
    ));
}

#[test]
fn sessions_get_distinct_prefixes() {
    let (registry, _state) = registry();
    let module = mail();
    let mut first = open(&registry, &module);
    let mut second = open(&registry, &module);
    first.initialize().unwrap();
    second.initialize().unwrap();

    assert_eq!(second.module_base(), "/1/");
    assert_eq!(registry.resources().prefixes(), ["/0/", "/1/"]);
    drop(first);
    assert_eq!(registry.live(), [1]);
    assert_eq!(registry.resources().prefixes(), ["/1/"]);
}

#[test]
fn stylesheet_change_converges() {
    let (registry, state) = registry();
    let module = mail();
    let mut session = open(&registry, &module);
    session.initialize().unwrap();

    assert!(!session.is_modified());

    module.touch("Mail.css", "body{color: red}");
    assert!(session.is_modified());
    assert_eq!(session.outstanding_styles(), (0, 0));
    assert_eq!(state.lock().count_calls("reload_styles"), 1);

    assert!(!session.is_modified());
    assert_eq!(state.lock().count_calls("reload_styles"), 1);
}

#[test]
fn unresponsive_reload_hits_the_ceiling() {
    let (registry, state) = registry();
    let module = mail();
    let mut session = open(&registry, &module);
    session.initialize().unwrap();
    state.lock().reloads_styles = false;

    module.touch("Mail.css", "body{}");
    assert!(session.is_modified());
    assert_eq!(session.outstanding_styles(), (1, 0));
    assert!(state.lock().pumps > 0);

    // the next refresh starts over
    assert!(!session.is_modified());
    assert_eq!(session.outstanding_styles(), (0, 0));
}

#[test]
fn unrendered_rule_stays_applying() {
    let (registry, state) = registry();
    let module = mail();
    let mut session = open(&registry, &module);
    session.initialize().unwrap();
    state.lock().renders_styles = false;

    module.touch("Mail.css", "body{}");
    assert!(session.is_modified());
    assert_eq!(session.outstanding_styles(), (0, 1));
}

#[test]
fn failed_reload_request_still_returns_modified() {
    let (registry, state) = registry();
    let module = mail();
    let mut session = open(&registry, &module);
    session.initialize().unwrap();
    state.lock().reload_fails = true;

    module.touch("Mail.css", "body{}");
    assert!(session.is_modified());
    assert_eq!(session.outstanding_styles(), (1, 0));
}

#[test]
fn startup_failure_unregisters_and_disposes() {
    let (registry, state) = registry();
    {
        let mut state = state.lock();
        state.startup = StartupOutcome::Fail("page crashed".to_string());
        state.error_log = "TypeError: x is undefined".to_string();
    }
    let mut session = open(&registry, &mail());

    let err = session.initialize().unwrap_err();
    assert!(matches!(err, Error::Host { .. }), "{err}");
    assert!(session.is_disposed());
    assert!(!registry.resources().contains("/0/"));
    assert!(registry.live().is_empty());
    assert_eq!(
        registry.last_error_log().as_deref(),
        Some("TypeError: x is undefined")
    );

    let state = state.lock();
    assert!(state.disposed);
    assert_eq!(state.count_calls("window_closed"), 0);
}

#[test]
fn startup_timeout_is_reported() {
    let (registry, state) = registry();
    state.lock().startup = StartupOutcome::Timeout;
    let mut session = open(&registry, &mail());

    let err = session.initialize().unwrap_err();
    assert!(matches!(err, Error::StartupTimeout { .. }), "{err}");
    assert!(session.is_disposed());
}

#[test]
fn missing_module_is_rejected() {
    let (registry, _state) = registry();
    assert!(matches!(registry.open(None), Err(Error::NoModule)));
    assert!(registry.live().is_empty());
}

#[test]
fn no_installed_host_is_reported() {
    weft_log::test();
    let resources = Arc::new(ResourceRegistry::new("http://weft.test"));
    let registry = SessionRegistry::new(resources, Vec::new(), config());
    let mut session = open(&registry, &mail());

    let err = session.initialize().unwrap_err();
    assert!(matches!(err, Error::NoRuntimeSupport), "{err}");
    assert_eq!(registry.last_error_log().as_deref(), Some("No live instance."));
}

#[test]
fn unsupported_runtime_version_is_reported() {
    let (registry, _state) = registry();
    let module = Arc::new(MemoryModule::new("com.example.Old", "1.4"));
    let mut session = open(&registry, &module);

    let err = session.initialize().unwrap_err();
    assert!(
        matches!(&err, Error::UnsupportedRuntime { version } if version == "1.4"),
        "{err}"
    );
    assert!(!registry.resources().contains("/0/"));
}

#[test]
fn shared_session_ignores_dispose() {
    let (registry, state) = registry();
    let mut session = open(&registry, &mail());
    session.initialize().unwrap();

    session.set_shared(true);
    session.dispose();
    assert!(session.is_initialized());
    assert!(!state.lock().disposed);

    session.set_shared(false);
    session.dispose();
    assert!(session.is_disposed());
    assert!(state.lock().disposed);
}

#[test]
fn dropping_a_shared_session_releases_its_prefix() {
    let (registry, state) = registry();
    let mut session = open(&registry, &mail());
    session.initialize().unwrap();
    session.set_shared(true);
    assert!(registry.resources().contains("/0/"));

    drop(session);

    assert!(!registry.resources().contains("/0/"));
    assert!(registry.live().is_empty());
    assert!(state.lock().disposed);
}

#[test]
fn dispose_cleans_up_the_window_once() {
    let (registry, state) = registry();
    let mut session = open(&registry, &mail());
    session.initialize().unwrap();

    session.dispose();
    session.dispose();

    let names: Vec<_> = state
        .lock()
        .calls
        .iter()
        .map(|c| c.name())
        .filter(|n| ["window_closed", "disable_close_handlers", "cleanup_events"].contains(n))
        .collect();
    assert_eq!(
        names,
        ["window_closed", "disable_close_handlers", "cleanup_events"]
    );
    assert!(!registry.resources().contains("/0/"));
    assert!(registry.live().is_empty());
    assert!(matches!(
        session.screenshot(),
        Err(Error::NotInitialized { index: 0 })
    ));
}

#[test]
fn screenshot_waits_for_images() {
    let (registry, state) = registry();
    let mut session = open(&registry, &mail());
    session.initialize().unwrap();
    state.lock().pending_images = 3;

    assert_eq!(session.screenshot().unwrap(), b"png:3");
}

#[test]
fn broken_image_probe_does_not_block_screenshot() {
    let (registry, state) = registry();
    let mut session = open(&registry, &mail());
    session.initialize().unwrap();
    {
        let mut state = state.lock();
        state.pending_images = 3;
        state.image_probe_fails = true;
    }

    assert_eq!(session.screenshot().unwrap(), b"png:0");
}

#[test]
fn resources_resolve_in_order() {
    let (registry, state) = registry();
    let module = Arc::new(
        MemoryModule::new("com.example.Mail", VERSION)
            .with_style("Mail.css", "body{}")
            .with_file("icon.png", "icon")
            .with_classpath("com/example/logo.png", "logo"),
    );
    let mut session = open(&registry, &module);
    session.initialize().unwrap();
    state
        .lock()
        .generated
        .insert("Mail.rpc".to_string(), b"policy".to_vec());
    let resources = registry.resources();

    assert_eq!(
        resources
            .resolve("/0/__classpath__/com/example/logo.png")
            .unwrap(),
        b"logo"
    );
    assert_eq!(
        resources.resolve("/0/__start.html?cache=1").unwrap(),
        session.bootstrap_html().into_bytes()
    );
    assert_eq!(resources.resolve("/0/icon.png").unwrap(), b"icon");
    assert_eq!(resources.resolve("/0/Mail.rpc").unwrap(), b"policy");
    assert_eq!(resources.resolve("/0/missing.txt"), None);
    assert_eq!(resources.resolve("/1/icon.png"), None);

    let css = resources.resolve("/0/Mail.css").unwrap();
    assert!(css.starts_with(b"body{}\n"));
    let url = apply_url(&css);
    assert_eq!(resources.resolve(&url).unwrap(), PLACEHOLDER_PNG);
    assert_eq!(resources.resolve(&url), None);
}

#[test]
fn live_stack_keeps_first_active() {
    let (registry, state) = registry();
    let mut session = open(&registry, &mail());
    session.initialize().unwrap();
    let deck = ElementId(7);
    state.lock().stacks.insert(deck, vec![false, true, true]);

    assert_eq!(session.reconcile_live_stack(deck, Some(0)).unwrap(), Some(1));
    assert_eq!(state.lock().stacks[&deck], [false, true, false]);
}

#[test]
fn live_stack_promotes_preferred() {
    let (registry, state) = registry();
    let mut session = open(&registry, &mail());
    session.initialize().unwrap();
    let deck = ElementId(7);
    let empty = ElementId(8);
    {
        let mut state = state.lock();
        state.stacks.insert(deck, vec![false, false, false]);
        state.stacks.insert(empty, Vec::new());
    }

    assert_eq!(session.reconcile_live_stack(deck, Some(2)).unwrap(), Some(2));
    assert_eq!(state.lock().stacks[&deck], [false, false, true]);
    assert_eq!(session.reconcile_live_stack(empty, Some(0)).unwrap(), None);
}

#[test]
fn sync_stack_follows_model_choice() {
    let (registry, state) = registry();
    let mut session = open(&registry, &mail());
    session.initialize().unwrap();

    let mut model = Model::new("Root", MemorySource::new());
    let root = model.root();
    let tabs = model
        .create_container("TabPanel", ContainerPolicy::tabs())
        .unwrap();
    model.attach(root, tabs, "add", None).unwrap();
    let mut pages = Vec::new();
    for _ in 0..3 {
        let page = model.create_widget("Panel");
        model.attach(tabs, page, "add", None).unwrap();
        pages.push(page);
    }
    model.set_active(tabs, pages[2]).unwrap();

    let element = ElementId(9);
    state.lock().stacks.insert(element, vec![false; 3]);
    assert_eq!(session.sync_stack(&mut model, tabs, element).unwrap(), Some(2));
    assert_eq!(state.lock().stacks[&element], [false, false, true]);
    assert_eq!(model.active_child(tabs), Some(pages[2]));
}

#[test]
fn stack_calls_need_a_running_session() {
    let (registry, _state) = registry();
    let mut session = open(&registry, &mail());
    assert!(matches!(
        session.reconcile_live_stack(ElementId(1), None),
        Err(Error::NotInitialized { index: 0 })
    ));
}

#[test]
fn root_bounds_include_margins_and_borders_in_strict_mode() {
    let (registry, state) = registry();
    let mut session = open(&registry, &mail());
    session.initialize().unwrap();
    assert!(session.is_strict_mode());
    {
        let mut state = state.lock();
        state.set_attribute(MOCK_ROOT, "clientWidth", 400);
        state.set_attribute(MOCK_ROOT, "clientHeight", 300);
        for side in ["top", "left", "bottom", "right"] {
            state.set_style(MOCK_ROOT, &format!("margin-{side}"), "8px");
        }
        state.set_style(MOCK_ROOT, "border-left-style", "solid");
        state.set_style(MOCK_ROOT, "border-left-width", "2px");
        // no style means no border
        state.set_style(MOCK_ROOT, "border-right-width", "5px");
    }

    assert_eq!(
        session.absolute_bounds(MOCK_ROOT).unwrap(),
        Rect {
            x: 0,
            y: 0,
            width: 418,
            height: 316,
        }
    );
    assert_eq!(
        session.model_bounds(MOCK_ROOT).unwrap(),
        Rect {
            x: 0,
            y: 0,
            width: 400,
            height: 300,
        }
    );
}

#[test]
fn element_bounds_subtract_margins() {
    let (registry, state) = registry();
    let mut session = open(&registry, &mail());
    session.initialize().unwrap();
    let button = ElementId(5);
    {
        let mut state = state.lock();
        state.set_attribute(button, "offsetWidth", 100);
        state.set_attribute(button, "offsetHeight", 20);
        state.set_attribute(button, "offsetLeft", 30);
        state.set_attribute(button, "offsetTop", 40);
        state.set_style(button, "margin-left", "5px");
        state.set_style(button, "margin-top", "3px");
        state.set_style(button, "padding-left", "4.5px");
        state.positions.insert(button, (130, 140));
    }

    assert_eq!(
        session.model_bounds(button).unwrap(),
        Rect {
            x: 25,
            y: 37,
            width: 105,
            height: 23,
        }
    );
    assert_eq!(
        session.absolute_bounds(button).unwrap(),
        Rect {
            x: 125,
            y: 137,
            width: 105,
            height: 23,
        }
    );
    assert_eq!(session.paddings(button).unwrap().left, 4);
    assert_eq!(session.computed_style(button, "color").unwrap(), None);
}

#[test]
fn bootstrap_is_served_over_http() {
    let server = ResourceServer::bind("127.0.0.1:0").unwrap();
    let (registry, _state) = registry_on(server.registry());
    let mut session = open(&registry, &mail());
    session.initialize().unwrap();

    let mut stream = TcpStream::connect(server.addr()).unwrap();
    write!(
        stream,
        "GET /0/__start.html HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        server.addr()
    )
    .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();

    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.contains("text/html"));
    assert!(response.contains("moduleId: \"com.example.Mail\""));
}
