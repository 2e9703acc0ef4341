use crate::cli::ServeArgs;
use anyhow::{Context, Result};
use std::{sync::Arc, thread, time::Duration};
use tracing::{info, warn};
use weft_runtime::{
    DirModule, HostFactory, ModuleDescriptor, ProcessHostFactory, ResourceServer, RuntimeConfig,
    SessionRegistry,
};

pub fn handle(args: ServeArgs) -> Result<()> {
    let config = RuntimeConfig::load_with_overrides(args.config.as_deref(), None)?;
    let module: Arc<dyn ModuleDescriptor> = Arc::new(
        DirModule::open(&args.module)
            .with_context(|| format!("Failed to open module at {}", args.module.display()))?,
    );

    let server = ResourceServer::bind(&config.bind)?;
    let factories: Vec<Box<dyn HostFactory>> =
        vec![Box::new(ProcessHostFactory::new(args.host, args.host_args))];
    let registry = SessionRegistry::new(server.registry(), factories, config);

    let mut session = registry.open(Some(module))?;
    session.initialize()?;
    println!("Serving {}", session.start_url());

    let refresh = Duration::from_millis(args.refresh_ms);
    while !session.is_disposed() {
        if session.is_modified() {
            let (requested, applying) = session.outstanding_styles();
            if requested + applying == 0 {
                info!("styles reloaded");
            } else {
                warn!(requested, applying, "styles reloaded partially");
            }
        }
        thread::sleep(refresh);
    }

    let log = registry.last_error_log().unwrap_or_default();
    anyhow::bail!("Live instance went away\n{log}")
}
