use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::commands::rebuild::{load_settings, prepare_offline};
use crate::commands::{CommandReport, read_text};
use aistudio_compressor::compressor::config::{CompressorConfig, load_config};
use aistudio_compressor::compressor::http::ReqwestTransport;
use aistudio_compressor::compressor::injection::InjectionScheduler;
use aistudio_compressor::compressor::intercept::{
    Disposition, EndpointMatcher, EventBus, HostRequest, InterceptedFetch, Interceptor,
    RequestLogger, TrafficEvent, TrafficObserver,
};
use aistudio_compressor::compressor::paths::resolve_paths;

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub url: String,
    pub method: String,
    pub body_file: Option<PathBuf>,
    pub history: Option<PathBuf>,
    pub response: Option<PathBuf>,
}

#[derive(Default)]
struct EventCounter {
    requests: AtomicUsize,
    responses: AtomicUsize,
}

impl TrafficObserver for EventCounter {
    fn observe(&self, event: &TrafficEvent) {
        match event {
            TrafficEvent::Request { .. } => self.requests.fetch_add(1, Ordering::SeqCst),
            TrafficEvent::Response { .. } => self.responses.fetch_add(1, Ordering::SeqCst),
        };
    }
}

pub fn run(options: &ReplayOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let config = load_config(&paths)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(replay(options, &config))
}

async fn replay(options: &ReplayOptions, config: &CompressorConfig) -> Result<CommandReport> {
    let mut report = CommandReport::new("replay");
    let matcher = EndpointMatcher::new(&config.host.origin)?;
    let scheduler = Arc::new(InjectionScheduler::new());

    match (&options.history, &options.response) {
        (Some(history), Some(response)) => {
            let settings = load_settings()?;
            if prepare_offline(history, response, &settings, &scheduler, &mut report)?.is_none() {
                return Ok(report);
            }
        }
        (None, None) => {}
        _ => {
            report.issue("--history and --response must be given together");
            return Ok(report);
        }
    }

    let bus = Arc::new(EventBus::new());
    let counter = Arc::new(EventCounter::default());
    bus.subscribe(Arc::new(RequestLogger));
    bus.subscribe(counter.clone());

    let endpoint = matcher.classify(&options.url);
    report.detail(format!(
        "endpoint={}",
        endpoint.map_or("unclassified", |endpoint| endpoint.method_name())
    ));

    let interceptor = Arc::new(Interceptor::new(matcher.clone(), Arc::clone(&scheduler), bus));
    let transport = Arc::new(ReqwestTransport::new(matcher, config.host.request_timeout_secs)?);
    let fetch = InterceptedFetch::new(transport, interceptor);

    let mut request = match &options.body_file {
        Some(path) => HostRequest::post(options.url.clone(), read_text(path)?),
        None => HostRequest::get(options.url.clone()),
    };
    request.method = options.method.to_ascii_uppercase();
    if request.method == "GET" && request.body.is_some() {
        report.issue("GET requests cannot carry --body-file");
        return Ok(report);
    }

    let (response, disposition) = fetch.dispatch_traced(request).await?;
    report.detail(format!("disposition={}", disposition_label(disposition)));
    report.detail(format!("status={} {}", response.status, response.status_text));
    report.detail(format!("response_bytes={}", response.body.len()));
    report.detail(format!(
        "observed_events={}",
        counter.requests.load(Ordering::SeqCst) + counter.responses.load(Ordering::SeqCst)
    ));
    if scheduler.has_pending() {
        report.detail("pending_injection=remaining");
    }
    if response.status >= 400 {
        report.issue(format!("host answered with status {}", response.status));
    }
    Ok(report)
}

fn disposition_label(disposition: Disposition) -> String {
    match disposition {
        Disposition::Served(endpoint) => format!("served:{}", endpoint.method_name()),
        Disposition::Rewritten => "rewritten".to_string(),
        Disposition::Observed => "observed".to_string(),
        Disposition::PassedThrough => "passthrough".to_string(),
    }
}

