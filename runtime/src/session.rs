//! One live instance of the rendered UI.
//!
//! A [`Session`] is opened from a [`SessionRegistry`], which carries the shared
//! resource registry, the installed host factories and the configuration, and
//! keeps track of which sessions are alive. Nothing here is global: tests
//! build their own registry.
//!
//! # Lifecycle
//!
//! 1. [`SessionRegistry::open`] allocates an index and the `/{index}/` prefix.
//! 2. [`Session::initialize`] picks a host, renders the bootstrap page,
//!    registers the prefix and starts the live instance. Any failure tears
//!    everything down again.
//! 3. [`Session::is_modified`] runs once per refresh and drives the
//!    stylesheet handshake (see [`crate::styles`]).
//! 4. [`Session::dispose`] (or drop) releases the instance unless the session
//!    is shared.

use crate::{
    bootstrap::{self, START_HTML},
    config::RuntimeConfig,
    error::{
        AlreadyInitializedSnafu, DisposedSnafu, Error, HostError, IoSnafu, NoModuleSnafu,
        NoRuntimeSupportSnafu, NotInitializedSnafu, Result, UnsupportedRuntimeSnafu,
    },
    host::{ElementId, GeneratedResources, HostBridge, HostFactory, NativeCall, NoGenerated},
    module::ModuleDescriptor,
    server::{ResourceProvider, ResourceRegistry},
    styles::{StyleWait, PLACEHOLDER_PNG},
    wait::poll_until,
};
use indexmap::IndexMap;
use parking_lot::RwLock;
use snafu::{ensure, OptionExt, ResultExt};
use std::{
    cell::{Cell, RefCell},
    collections::BTreeSet,
    path::PathBuf,
    rc::Rc,
    sync::Arc,
};
use tracing::{debug, info, warn};

/// Paths containing this marker are looked up with
/// [`ModuleDescriptor::classpath_resource`].
pub const CLASSPATH_MARKER: &str = "/__classpath__/";

/// Everything the resource server needs to answer for one session.
struct SessionResources {
    module: Arc<dyn ModuleDescriptor>,
    module_base: String,
    start_path: String,
    html: RwLock<String>,
    styles: StyleWait,
    generated: RwLock<Arc<dyn GeneratedResources>>,
}

impl SessionResources {
    fn static_resource(&self, path: &str) -> Option<Vec<u8>> {
        match self.module.resource(path) {
            Ok(found) => found,
            Err(e) => {
                warn!(path, "Failed to read module resource: {e}");
                None
            },
        }
    }
}

impl ResourceProvider for SessionResources {
    fn resource(&self, request_path: &str) -> Option<Vec<u8>> {
        if let Some(at) = request_path.find(CLASSPATH_MARKER) {
            let path = &request_path[at + CLASSPATH_MARKER.len()..];
            return self.module.classpath_resource(path).ok().flatten();
        }

        let resource_path = request_path.split('?').next().unwrap_or(request_path);
        if resource_path == self.start_path {
            return Some(self.html.read().clone().into_bytes());
        }

        let public = resource_path
            .strip_prefix(self.module_base.as_str())
            .unwrap_or(resource_path);
        if self.styles.take_apply(public) {
            return Some(PLACEHOLDER_PNG.to_vec());
        }

        let content = match self.static_resource(public) {
            Some(content) => content,
            None => {
                let generated = self.generated.read().clone();
                generated.generated_resource(public)?
            },
        };
        Some(self.styles.rewrite(public, content))
    }
}

/// Shared context sessions are opened from.
pub struct SessionRegistry {
    resources: Arc<ResourceRegistry>,
    factories: Vec<Box<dyn HostFactory>>,
    config: RuntimeConfig,
    next_index: Cell<usize>,
    live: RefCell<BTreeSet<usize>>,
    last_error_log: RefCell<Option<String>>,
}

impl SessionRegistry {
    pub fn new(
        resources: Arc<ResourceRegistry>,
        factories: Vec<Box<dyn HostFactory>>,
        config: RuntimeConfig,
    ) -> Rc<Self> {
        Rc::new(Self {
            resources,
            factories,
            config,
            next_index: Cell::new(0),
            live: RefCell::new(BTreeSet::new()),
            last_error_log: RefCell::new(None),
        })
    }

    pub fn resources(&self) -> &Arc<ResourceRegistry> {
        &self.resources
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Indexes of sessions opened and not yet disposed.
    pub fn live(&self) -> Vec<usize> {
        self.live.borrow().iter().copied().collect()
    }

    /// Host error log kept from the most recently disposed session.
    pub fn last_error_log(&self) -> Option<String> {
        self.last_error_log.borrow().clone()
    }

    /// Open a session for `module`. The session is not started yet.
    pub fn open(self: &Rc<Self>, module: Option<Arc<dyn ModuleDescriptor>>) -> Result<Session> {
        let module = module.context(NoModuleSnafu)?;
        let index = self.next_index.get();
        self.next_index.set(index + 1);
        self.live.borrow_mut().insert(index);

        let module_base = format!("/{index}/");
        let stamps = module
            .style_resources()
            .into_iter()
            .map(|path| {
                let stamp = module.stamp(&path);
                (path, stamp)
            })
            .collect::<IndexMap<_, _>>();
        let styles = StyleWait::new(stamps.keys().cloned().collect(), module_base.clone());
        let resources = Arc::new(SessionResources {
            start_path: format!("{module_base}{START_HTML}"),
            module_base,
            module,
            html: RwLock::new(String::new()),
            styles,
            generated: RwLock::new(Arc::new(NoGenerated)),
        });
        debug!(index, module = resources.module.id(), "session opened");

        Ok(Session {
            index,
            registry: self.clone(),
            resources,
            stamps,
            host: None,
            root: None,
            strict_mode: false,
            state: State::Opened,
            shared: false,
        })
    }

    fn select_host(&self, module: &dyn ModuleDescriptor) -> Result<Box<dyn HostBridge>> {
        ensure!(!self.factories.is_empty(), NoRuntimeSupportSnafu);
        let version = module.runtime_version();
        for factory in &self.factories {
            if let Some(host) = factory.create(version, module)? {
                return Ok(host);
            }
        }
        UnsupportedRuntimeSnafu { version }.fail()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Opened,
    Running,
    Disposed,
}

pub struct Session {
    index: usize,
    registry: Rc<SessionRegistry>,
    resources: Arc<SessionResources>,
    stamps: IndexMap<String, Option<u64>>,
    pub(crate) host: Option<Box<dyn HostBridge>>,
    pub(crate) root: Option<ElementId>,
    strict_mode: bool,
    state: State,
    shared: bool,
}

impl Session {
    pub fn index(&self) -> usize {
        self.index
    }

    /// URL prefix of this session's resources, e.g. `/0/`.
    pub fn module_base(&self) -> &str {
        &self.resources.module_base
    }

    pub fn start_url(&self) -> String {
        self.registry.resources.url(&self.resources.start_path)
    }

    pub fn module(&self) -> &Arc<dyn ModuleDescriptor> {
        &self.resources.module
    }

    pub fn bootstrap_html(&self) -> String {
        self.resources.html.read().clone()
    }

    /// The live page renders in standards mode.
    pub fn is_strict_mode(&self) -> bool {
        self.strict_mode
    }

    pub fn is_initialized(&self) -> bool {
        self.state == State::Running
    }

    pub fn is_disposed(&self) -> bool {
        self.state == State::Disposed || self.host.as_ref().is_some_and(|h| h.is_disposed())
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// Shared sessions ignore [`Session::dispose`]; their owner clears the
    /// flag before disposing.
    pub fn set_shared(&mut self, shared: bool) {
        self.shared = shared;
    }

    /// Number of (requested, applying) stylesheet markers still outstanding.
    pub fn outstanding_styles(&self) -> (usize, usize) {
        self.resources.styles.outstanding()
    }

    pub fn root_element(&self) -> Option<ElementId> {
        self.root
    }

    pub(crate) fn host_mut(&mut self) -> Result<&mut dyn HostBridge> {
        ensure!(self.state != State::Disposed, DisposedSnafu { index: self.index });
        match self.host.as_deref_mut() {
            Some(host) => Ok(host),
            None => NotInitializedSnafu { index: self.index }.fail(),
        }
    }

    /// Render the bootstrap page, register the prefix and start the live
    /// instance. On failure nothing stays registered and the session is
    /// disposed.
    pub fn initialize(&mut self) -> Result<()> {
        ensure!(self.state != State::Disposed, DisposedSnafu { index: self.index });
        ensure!(
            self.state == State::Opened,
            AlreadyInitializedSnafu { index: self.index }
        );

        match self.start() {
            Ok(()) => {
                self.state = State::Running;
                info!(index = self.index, url = %self.start_url(), "live instance started");
                Ok(())
            },
            Err(e) => {
                warn!(index = self.index, "live instance failed to start: {e}");
                self.teardown();
                Err(e)
            },
        }
    }

    fn start(&mut self) -> Result<()> {
        let config = self.registry.config.clone();
        let module = self.resources.module.clone();
        let host = self.host.insert(self.registry.select_host(module.as_ref())?);
        host.set_viewport(config.viewport_width, config.viewport_height)?;

        let boot = bootstrap::render(
            module.as_ref(),
            &self.resources.module_base,
            &host.runtime_info().user_agent,
            &self.resources.styles,
        )
        .context(IoSnafu {
            path: PathBuf::from(module.host_page().unwrap_or_default()),
        })?;
        *self.resources.html.write() = boot.html;
        *self.resources.generated.write() = host.generated_resources();
        self.strict_mode = boot.strict_mode;

        self.registry
            .resources
            .add(self.resources.module_base.clone(), self.resources.clone());

        let url = self.registry.resources.url(&self.resources.start_path);
        host.startup(&url, module.id(), config.startup_timeout())
            .map_err(|source| match source {
                HostError::Timeout { .. } => Error::StartupTimeout {
                    timeout_secs: config.startup_timeout_secs,
                    source,
                },
                source => Error::Host { source },
            })?;

        let call = NativeCall::RootElement;
        self.root = Some(host.invoke(call.clone())?.into_element(&call)?);
        if let Err(e) = host.invoke(NativeCall::EnableScrolling { enabled: false }) {
            warn!("Failed to disable scrolling: {e}");
        }
        host.activate()?;
        Ok(())
    }

    pub fn activate(&mut self) -> Result<()> {
        self.host_mut()?.activate()?;
        Ok(())
    }

    /// Compare stylesheet stamps against the last snapshot. When any changed,
    /// ask the live instance to reload and wait for the handshake to settle.
    ///
    /// Returns `true` at most once per change.
    pub fn is_modified(&mut self) -> bool {
        let styles = &self.resources.styles;
        styles.reset();

        let mut modified = false;
        for (path, stamp) in self.stamps.iter_mut() {
            let current = self.resources.module.stamp(path);
            if current != *stamp {
                debug!(path, "stylesheet changed");
                *stamp = current;
                modified = true;
            }
        }
        if !modified {
            return false;
        }

        styles.request_all();
        if self.state == State::Running {
            if let Some(host) = self.host.as_deref_mut() {
                if let Err(e) = host.invoke(NativeCall::ReloadStyles) {
                    warn!("Failed to trigger style reload: {e}");
                }
            }
        }
        self.wait_for_styles();
        true
    }

    /// Wait, within the configured ceiling, for outstanding stylesheet
    /// markers. Returns whether the handshake settled.
    pub fn wait_for_styles(&mut self) -> bool {
        let config = &self.registry.config;
        let resources = self.resources.clone();
        let Some(host) = self.host.as_deref_mut().filter(|_| self.state == State::Running) else {
            return resources.styles.is_settled();
        };
        let settled = poll_until(
            config.style_wait(),
            config.poll_interval(),
            host,
            |_| resources.styles.is_settled(),
            |host| host.pump_messages(),
        );
        if !settled {
            let (requested, applying) = resources.styles.outstanding();
            debug!(requested, applying, "style wait hit its ceiling");
        }
        settled
    }

    /// Wait, within the configured ceiling, for images to finish loading.
    pub fn wait_for_images(&mut self) -> bool {
        let config = &self.registry.config;
        let Some(host) = self.host.as_deref_mut().filter(|_| self.state == State::Running) else {
            return true;
        };
        poll_until(
            config.image_wait(),
            config.poll_interval(),
            host,
            |host| {
                let call = NativeCall::ImagesComplete;
                match host.invoke(call.clone()).and_then(|v| v.into_bool(&call)) {
                    Ok(complete) => complete,
                    Err(e) => {
                        warn!("Image probe failed: {e}");
                        true
                    },
                }
            },
            |host| host.pump_messages(),
        )
    }

    /// PNG capture of the live instance once styles and images settled.
    pub fn screenshot(&mut self) -> Result<Vec<u8>> {
        ensure!(
            self.state == State::Running,
            NotInitializedSnafu { index: self.index }
        );
        self.wait_for_styles();
        self.wait_for_images();
        Ok(self.host_mut()?.screenshot()?)
    }

    /// Release the live instance. A no-op for shared or disposed sessions.
    pub fn dispose(&mut self) {
        if self.shared || self.state == State::Disposed {
            return;
        }
        self.teardown();
    }

    /// Best-effort release of everything the session holds.
    fn teardown(&mut self) {
        let log = match &self.host {
            Some(host) => host.error_log(),
            None => "No live instance.".to_string(),
        };
        *self.registry.last_error_log.borrow_mut() = Some(log);

        let was_running = self.state == State::Running;
        if let Some(host) = self.host.as_deref_mut().filter(|h| !h.is_disposed()) {
            if was_running {
                for call in [
                    NativeCall::WindowClosed,
                    NativeCall::DisableCloseHandlers,
                    NativeCall::CleanupEvents,
                ] {
                    if let Err(e) = host.invoke(call) {
                        warn!("Window cleanup failed: {e}");
                    }
                }
            }
            self.registry.resources.remove(&self.resources.module_base);
            if let Err(e) = host.dispose() {
                warn!("Failed to dispose live instance: {e}");
            }
        }
        self.registry.resources.remove(&self.resources.module_base);
        self.registry.live.borrow_mut().remove(&self.index);
        self.resources.styles.reset();
        self.root = None;
        self.state = State::Disposed;
        debug!(index = self.index, "session disposed");
    }
}

impl Drop for Session {
    // Shared sessions are torn down here too; the host does not outlive them.
    fn drop(&mut self) {
        if self.state != State::Disposed {
            self.teardown();
        }
    }
}
