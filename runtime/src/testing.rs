//! In-memory stand-ins for a module on disk and a hosting process.
//!
//! [`MockHost`] behaves like a tiny browser: on startup it fetches the
//! bootstrap page and every linked stylesheet through the
//! [`ResourceRegistry`], and when asked to reload styles it re-fetches them on
//! the next [`HostBridge::pump_messages`], rendering each appended wait rule by
//! fetching its marker image. Switches on [`MockState`] make it misbehave.

use crate::{
    error::HostError,
    host::{
        ElementId, GeneratedResources, HostBridge, HostFactory, NativeCall, NativeValue,
        RuntimeInfo,
    },
    module::ModuleDescriptor,
    server::ResourceRegistry,
    styles::WAIT_MARKER_PREFIX,
};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::{io, sync::Arc, time::Duration};

#[derive(Debug, Clone)]
struct File {
    content: Vec<u8>,
    stamp: u64,
}

/// A module whose resources live in memory. Stamps only move when
/// [`MemoryModule::touch`] is called.
#[derive(Debug)]
pub struct MemoryModule {
    id: String,
    name: String,
    version: String,
    locale: String,
    host_page: Option<String>,
    styles: Vec<String>,
    scripts: Vec<String>,
    files: RwLock<FxHashMap<String, File>>,
    classpath: FxHashMap<String, Vec<u8>>,
}

impl MemoryModule {
    pub fn new(id: &str, version: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.rsplit('.').next().unwrap_or(id).to_string(),
            version: version.to_string(),
            locale: "default".to_string(),
            host_page: None,
            styles: Vec::new(),
            scripts: Vec::new(),
            files: RwLock::new(FxHashMap::default()),
            classpath: FxHashMap::default(),
        }
    }

    pub fn with_locale(mut self, locale: &str) -> Self {
        self.locale = locale.to_string();
        self
    }

    pub fn with_file(self, path: &str, content: impl Into<Vec<u8>>) -> Self {
        self.files.write().insert(
            path.to_string(),
            File {
                content: content.into(),
                stamp: 1,
            },
        );
        self
    }

    pub fn with_host_page(mut self, path: &str, content: &str) -> Self {
        self.host_page = Some(path.to_string());
        self.with_file(path, content)
    }

    pub fn with_style(mut self, path: &str, content: &str) -> Self {
        self.styles.push(path.to_string());
        self.with_file(path, content)
    }

    pub fn with_script(mut self, path: &str, content: &str) -> Self {
        self.scripts.push(path.to_string());
        self.with_file(path, content)
    }

    pub fn with_classpath(mut self, path: &str, content: impl Into<Vec<u8>>) -> Self {
        self.classpath.insert(path.to_string(), content.into());
        self
    }

    /// Replace a file's content and advance its stamp.
    pub fn touch(&self, path: &str, content: impl Into<Vec<u8>>) {
        let mut files = self.files.write();
        let file = files.entry(path.to_string()).or_insert(File {
            content: Vec::new(),
            stamp: 0,
        });
        file.content = content.into();
        file.stamp += 1;
    }
}

impl ModuleDescriptor for MemoryModule {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn runtime_version(&self) -> &str {
        &self.version
    }

    fn default_locale(&self) -> &str {
        &self.locale
    }

    fn host_page(&self) -> Option<&str> {
        self.host_page.as_deref()
    }

    fn style_resources(&self) -> Vec<String> {
        self.styles.clone()
    }

    fn script_resources(&self) -> Vec<String> {
        self.scripts.clone()
    }

    fn resource(&self, path: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.files.read().get(path).map(|f| f.content.clone()))
    }

    fn stamp(&self, path: &str) -> Option<u64> {
        self.files.read().get(path).map(|f| f.stamp)
    }

    fn classpath_resource(&self, path: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.classpath.get(path).cloned())
    }
}

/// How [`MockHost::startup`] ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupOutcome {
    Ready,
    Timeout,
    Fail(String),
}

/// Observable and adjustable state of the simulated live instance.
#[derive(Debug)]
pub struct MockState {
    pub startup: StartupOutcome,
    /// Re-fetch stylesheets after a reload request.
    pub reloads_styles: bool,
    /// Fetch the marker image of each appended wait rule.
    pub renders_styles: bool,
    pub reload_fails: bool,
    /// Pumps until images report complete.
    pub pending_images: usize,
    pub image_probe_fails: bool,
    pub calls: Vec<NativeCall>,
    /// Paths fetched from the resource registry, in order.
    pub fetched: Vec<String>,
    pub pumps: usize,
    pub started_url: Option<String>,
    pub viewport: Option<(u32, u32)>,
    pub activated: usize,
    pub disposed: bool,
    pub error_log: String,
    pub generated: FxHashMap<String, Vec<u8>>,
    pub styles: FxHashMap<(ElementId, String), String>,
    pub attributes: FxHashMap<(ElementId, String), i64>,
    pub positions: FxHashMap<ElementId, (i64, i64)>,
    pub stacks: FxHashMap<ElementId, Vec<bool>>,
    reload_pending: bool,
    page: Option<Page>,
}

#[derive(Debug, Clone)]
struct Page {
    module_base: String,
    stylesheets: Vec<String>,
}

pub const MOCK_ROOT: ElementId = ElementId(1);

impl Default for MockState {
    fn default() -> Self {
        Self {
            startup: StartupOutcome::Ready,
            reloads_styles: true,
            renders_styles: true,
            reload_fails: false,
            pending_images: 0,
            image_probe_fails: false,
            calls: Vec::new(),
            fetched: Vec::new(),
            pumps: 0,
            started_url: None,
            viewport: None,
            activated: 0,
            disposed: false,
            error_log: String::new(),
            generated: FxHashMap::default(),
            styles: FxHashMap::default(),
            attributes: FxHashMap::default(),
            positions: FxHashMap::default(),
            stacks: FxHashMap::default(),
            reload_pending: false,
            page: None,
        }
    }
}

impl MockState {
    pub fn set_style(&mut self, element: ElementId, property: &str, value: &str) {
        self.styles
            .insert((element, property.to_string()), value.to_string());
    }

    pub fn set_attribute(&mut self, element: ElementId, name: &str, value: i64) {
        self.attributes.insert((element, name.to_string()), value);
    }

    pub fn count_calls(&self, name: &str) -> usize {
        self.calls.iter().filter(|c| c.name() == name).count()
    }
}

pub type MockHandle = Arc<Mutex<MockState>>;

struct MockGenerated(MockHandle);

impl GeneratedResources for MockGenerated {
    fn generated_resource(&self, path: &str) -> Option<Vec<u8>> {
        self.0.lock().generated.get(path).cloned()
    }
}

/// `href='...'` values of stylesheet links in a page.
fn linked_stylesheets(html: &str) -> Vec<String> {
    html.lines()
        .filter(|line| line.contains("rel='stylesheet'"))
        .filter_map(|line| {
            let start = line.find("href='")? + "href='".len();
            let end = line[start..].find('\'')?;
            Some(line[start..start + end].to_string())
        })
        .collect()
}

/// Marker image URLs of the wait rules appended to a stylesheet.
fn wait_rule_urls(css: &str) -> Vec<String> {
    css.lines()
        .filter(|line| line.starts_with(&format!(".{WAIT_MARKER_PREFIX}")))
        .filter_map(|line| {
            let start = line.find("url('")? + "url('".len();
            let end = line[start..].find('\'')?;
            Some(line[start..start + end].to_string())
        })
        .collect()
}

pub struct MockHost {
    info: RuntimeInfo,
    registry: Arc<ResourceRegistry>,
    state: MockHandle,
}

impl MockHost {
    pub fn new(registry: Arc<ResourceRegistry>, version: &str) -> Self {
        Self {
            info: RuntimeInfo {
                version: version.to_string(),
                user_agent: "mock".to_string(),
            },
            registry,
            state: Arc::default(),
        }
    }

    pub fn with_state(mut self, state: MockHandle) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> MockHandle {
        self.state.clone()
    }

    fn fetch(&self, path: &str) -> Option<Vec<u8>> {
        // the session answers from the server side; never hold the state lock here
        let content = self.registry.resolve(path);
        self.state.lock().fetched.push(path.to_string());
        content
    }

    fn load_styles(&self, page: &Page) {
        let renders = self.state.lock().renders_styles;
        for sheet in &page.stylesheets {
            let Some(css) = self.fetch(&format!("{}{sheet}", page.module_base)) else {
                continue;
            };
            if renders {
                for url in wait_rule_urls(&String::from_utf8_lossy(&css)) {
                    self.fetch(&url);
                }
            }
        }
    }
}

impl HostBridge for MockHost {
    fn runtime_info(&self) -> &RuntimeInfo {
        &self.info
    }

    fn set_viewport(&mut self, width: u32, height: u32) -> Result<(), HostError> {
        self.state.lock().viewport = Some((width, height));
        Ok(())
    }

    fn startup(
        &mut self,
        url: &str,
        module_id: &str,
        timeout: Option<Duration>,
    ) -> Result<(), HostError> {
        let outcome = {
            let mut state = self.state.lock();
            state.started_url = Some(url.to_string());
            state.startup.clone()
        };
        match outcome {
            StartupOutcome::Ready => {},
            StartupOutcome::Timeout => {
                return Err(HostError::Timeout {
                    method: "startup".to_string(),
                    timeout_ms: timeout.map_or(0, |t| t.as_millis()),
                });
            },
            StartupOutcome::Fail(message) => {
                return Err(HostError::Remote {
                    method: "startup".to_string(),
                    message,
                });
            },
        }

        let path = url.strip_prefix(self.registry.origin()).unwrap_or(url);
        let html = self.fetch(path).ok_or_else(|| HostError::Remote {
            method: "startup".to_string(),
            message: format!("{module_id}: no bootstrap page at {path}"),
        })?;
        let page = Page {
            module_base: path
                .rsplit_once('/')
                .map_or("/", |(base, _)| base)
                .to_string()
                + "/",
            stylesheets: linked_stylesheets(&String::from_utf8_lossy(&html)),
        };
        self.load_styles(&page);
        self.state.lock().page = Some(page);
        Ok(())
    }

    fn activate(&mut self) -> Result<(), HostError> {
        self.state.lock().activated += 1;
        Ok(())
    }

    fn invoke(&mut self, call: NativeCall) -> Result<NativeValue, HostError> {
        let mut state = self.state.lock();
        state.calls.push(call.clone());
        let fail = |message: &str| HostError::Remote {
            method: call.name().to_string(),
            message: message.to_string(),
        };
        let value = match &call {
            NativeCall::ReloadStyles => {
                if state.reload_fails {
                    return Err(fail("reload is broken"));
                }
                state.reload_pending = true;
                NativeValue::Unit
            },
            NativeCall::ImagesComplete => {
                if state.image_probe_fails {
                    return Err(fail("probe is broken"));
                }
                NativeValue::Bool(state.pending_images == 0)
            },
            NativeCall::WindowClosed
            | NativeCall::DisableCloseHandlers
            | NativeCall::CleanupEvents
            | NativeCall::EnableScrolling { .. } => NativeValue::Unit,
            NativeCall::RootElement => NativeValue::Element(MOCK_ROOT),
            NativeCall::ComputedStyle { element, property } => state
                .styles
                .get(&(*element, property.clone()))
                .map_or(NativeValue::Null, |v| NativeValue::Text(v.clone())),
            NativeCall::IntAttribute { element, name } => NativeValue::Int(
                state
                    .attributes
                    .get(&(*element, name.clone()))
                    .copied()
                    .unwrap_or(0),
            ),
            NativeCall::AbsolutePosition { element } => {
                let (x, y) = state.positions.get(element).copied().unwrap_or((0, 0));
                NativeValue::Point { x, y }
            },
            NativeCall::StackLen { element } => {
                let len = state.stacks.get(element).map_or(0, Vec::len);
                NativeValue::Int(len as i64)
            },
            NativeCall::StackIsActive { element, index } => NativeValue::Bool(
                state
                    .stacks
                    .get(element)
                    .and_then(|s| s.get(*index))
                    .copied()
                    .ok_or_else(|| fail("no such stack child"))?,
            ),
            NativeCall::StackSetActive {
                element,
                index,
                active,
            } => {
                let slot = state
                    .stacks
                    .get_mut(element)
                    .and_then(|s| s.get_mut(*index))
                    .ok_or_else(|| fail("no such stack child"))?;
                *slot = *active;
                NativeValue::Unit
            },
        };
        Ok(value)
    }

    fn generated_resources(&self) -> Arc<dyn GeneratedResources> {
        Arc::new(MockGenerated(self.state.clone()))
    }

    fn pump_messages(&mut self) {
        let (page, reload) = {
            let mut state = self.state.lock();
            state.pumps += 1;
            state.pending_images = state.pending_images.saturating_sub(1);
            let reload = std::mem::take(&mut state.reload_pending) && state.reloads_styles;
            (state.page.clone(), reload)
        };
        if let (Some(page), true) = (page, reload) {
            self.load_styles(&page);
        }
    }

    fn screenshot(&mut self) -> Result<Vec<u8>, HostError> {
        let state = self.state.lock();
        Ok(format!("png:{}", state.pumps).into_bytes())
    }

    fn error_log(&self) -> String {
        self.state.lock().error_log.clone()
    }

    fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    fn dispose(&mut self) -> Result<(), HostError> {
        self.state.lock().disposed = true;
        Ok(())
    }
}

/// Creates [`MockHost`]s sharing one [`MockState`] for a set of runtime
/// versions.
pub struct MockFactory {
    registry: Arc<ResourceRegistry>,
    versions: Vec<String>,
    state: MockHandle,
}

impl MockFactory {
    pub fn new(registry: Arc<ResourceRegistry>, versions: &[&str]) -> Self {
        Self {
            registry,
            versions: versions.iter().map(|v| v.to_string()).collect(),
            state: Arc::default(),
        }
    }

    pub fn state(&self) -> MockHandle {
        self.state.clone()
    }
}

impl HostFactory for MockFactory {
    fn create(
        &self,
        runtime_version: &str,
        _module: &dyn ModuleDescriptor,
    ) -> Result<Option<Box<dyn HostBridge>>, HostError> {
        if !self.versions.iter().any(|v| v == runtime_version) {
            return Ok(None);
        }
        let host = MockHost::new(self.registry.clone(), runtime_version)
            .with_state(self.state.clone());
        Ok(Some(Box::new(host)))
    }
}
