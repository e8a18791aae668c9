pub mod branch;
pub mod capture;
pub mod config;
pub mod fingerprint;
pub mod http;
pub mod injection;
pub mod intercept;
pub mod paths;
pub mod poll;
pub mod settings;
pub mod summary;
pub mod tail;
pub mod wire;

use anyhow::Result;
use std::sync::Arc;

pub use branch::{BranchOutcome, HostUi};
pub use capture::{Compressor, TriggerOutcome};
pub use config::CompressorConfig;
pub use injection::InjectionScheduler;
pub use intercept::{EventBus, HookRegistry, Interceptor};
pub use settings::{Settings, SettingsSource};

/// The wired capture → transform → injection pipeline for one host page.
pub struct Pipeline {
    pub compressor: Arc<Compressor>,
    pub scheduler: Arc<InjectionScheduler>,
    pub bus: Arc<EventBus>,
    pub interceptor: Arc<Interceptor>,
    pub hooks: HookRegistry,
}

impl Pipeline {
    pub fn new(
        config: &CompressorConfig,
        settings: &dyn SettingsSource,
        ui: Arc<dyn HostUi>,
    ) -> Result<Self> {
        let scheduler = Arc::new(InjectionScheduler::new());
        let bus = Arc::new(EventBus::new());
        let matcher = intercept::EndpointMatcher::new(&config.host.origin)?;
        let interceptor = Arc::new(Interceptor::new(
            matcher,
            Arc::clone(&scheduler),
            Arc::clone(&bus),
        ));
        let compressor = Arc::new(Compressor::new(
            settings.snapshot(),
            Arc::clone(&scheduler),
            ui,
            config.timing.clone(),
        ));

        bus.subscribe(Arc::new(intercept::RequestLogger));
        bus.subscribe(compressor.clone());

        Ok(Self {
            compressor,
            scheduler,
            bus,
            hooks: HookRegistry::new(Arc::clone(&interceptor)),
            interceptor,
        })
    }

    /// One lifecycle tick, meant to run every `timing.rehook_interval()`:
    /// expire a run whose traffic never completed and hook any new contexts.
    pub fn tick(&self, contexts: &[&dyn intercept::HostContext]) -> Vec<intercept::HookReport> {
        self.compressor.expire_stale_run();
        self.hooks.ensure_hooked_all(contexts)
    }

    /// Wrap a promise-style transport so its traffic flows through the
    /// pipeline.
    pub fn wrap_transport(&self, inner: Arc<dyn intercept::Transport>) -> intercept::InterceptedFetch {
        intercept::InterceptedFetch::new(inner, Arc::clone(&self.interceptor))
    }
}
