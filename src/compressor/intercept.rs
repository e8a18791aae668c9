//! Network interception: wrapping the host's two request interfaces so the
//! compressor can observe generate-content traffic and substitute the
//! responses that load a freshly branched conversation.
//!
//! Both wrappers share one [`Interceptor`], which decides per request
//! whether to serve a synthetic body, rewrite the outgoing body, observe the
//! exchange on the [`EventBus`], or forward it untouched.

use crate::compressor::injection::InjectionScheduler;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;
use std::borrow::Cow;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

pub const RPC_SERVICE_PREFIX: &str =
    "/$rpc/google.internal.alkali.applications.makersuite.v1.MakerSuiteService/";
pub const SYNTHETIC_CONTENT_TYPE: &str = "application/json+protobuf; charset=UTF-8";

pub const FETCH_HOOK_MARKER: &str = "__aistudio_compressor_fetch_hooked";
pub const XHR_HOOK_MARKER: &str = "__aistudio_compressor_xhr_hooked";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Endpoint {
    GenerateContent,
    ResolveDriveResource,
    ListPrompts,
    CreatePrompt,
}

impl Endpoint {
    pub const ALL: [Endpoint; 4] = [
        Endpoint::GenerateContent,
        Endpoint::ResolveDriveResource,
        Endpoint::ListPrompts,
        Endpoint::CreatePrompt,
    ];

    pub fn method_name(self) -> &'static str {
        match self {
            Endpoint::GenerateContent => "GenerateContent",
            Endpoint::ResolveDriveResource => "ResolveDriveResource",
            Endpoint::ListPrompts => "ListPrompts",
            Endpoint::CreatePrompt => "CreatePrompt",
        }
    }

    pub fn path_suffix(self) -> String {
        format!("{RPC_SERVICE_PREFIX}{}", self.method_name())
    }
}

/// Classifies request URLs, resolving relative ones against the host origin.
#[derive(Debug, Clone)]
pub struct EndpointMatcher {
    base: Url,
}

impl EndpointMatcher {
    pub fn new(origin: &str) -> Result<Self> {
        let base = Url::parse(origin).map_err(|err| anyhow!("invalid host origin `{origin}`: {err}"))?;
        Ok(Self { base })
    }

    pub fn resolve(&self, url: &str) -> Option<Url> {
        self.base.join(url).ok()
    }

    pub fn classify(&self, url: &str) -> Option<Endpoint> {
        let resolved = self.resolve(url)?;
        let path = resolved.path();
        Endpoint::ALL
            .into_iter()
            .find(|endpoint| path.ends_with(&endpoint.path_suffix()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Text(String),
    Bytes(Vec<u8>),
}

impl RequestBody {
    /// Best-effort text view; `None` when the bytes are not UTF-8.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            RequestBody::Text(text) => Some(Cow::Borrowed(text.as_str())),
            RequestBody::Bytes(bytes) => std::str::from_utf8(bytes).ok().map(Cow::Borrowed),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            RequestBody::Text(text) => text.into_bytes(),
            RequestBody::Bytes(bytes) => bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl HostRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: "POST".to_string(),
            url: url.into(),
            headers: vec![("content-type".to_string(), SYNTHETIC_CONTENT_TYPE.to_string())],
            body: Some(RequestBody::Text(body.into())),
        }
    }

    pub fn body_text(&self) -> Option<Cow<'_, str>> {
        self.body.as_ref().and_then(RequestBody::as_text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HostResponse {
    /// `200 OK` carrying `body` with the host's RPC content type.
    pub fn synthetic(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            status_text: "OK".to_string(),
            headers: vec![("content-type".to_string(), SYNTHETIC_CONTENT_TYPE.to_string())],
            body: body.into().into_bytes(),
        }
    }

    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Promise-style request interface.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn dispatch(&self, request: HostRequest) -> Result<HostResponse>;
}

pub type Completion = Box<dyn FnOnce(Result<HostResponse>) + Send + 'static>;

/// Completion-callback request interface.
pub trait CallbackTransport: Send + Sync {
    fn send(&self, request: HostRequest, done: Completion);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrafficEvent {
    Request {
        url: String,
        headers: Vec<(String, String)>,
        body_text: Option<String>,
    },
    Response {
        url: String,
        status: u16,
        status_text: String,
        body_text: Option<String>,
    },
}

pub trait TrafficObserver: Send + Sync {
    fn observe(&self, event: &TrafficEvent);
}

#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Arc<dyn TrafficObserver>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn TrafficObserver>) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    pub fn publish(&self, event: &TrafficEvent) {
        let subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for subscriber in subscribers {
            subscriber.observe(event);
        }
    }
}

/// Debug-level trace of every observed generate-content exchange.
#[derive(Debug, Default)]
pub struct RequestLogger;

impl TrafficObserver for RequestLogger {
    fn observe(&self, event: &TrafficEvent) {
        match event {
            TrafficEvent::Request {
                url,
                headers,
                body_text,
            } => debug!(
                target: "compressor::net",
                %url,
                header_count = headers.len(),
                body_len = body_text.as_ref().map_or(0, String::len),
                "GenerateContent request"
            ),
            TrafficEvent::Response {
                url,
                status,
                status_text,
                body_text,
            } => debug!(
                target: "compressor::net",
                %url,
                status,
                %status_text,
                body_len = body_text.as_ref().map_or(0, String::len),
                "GenerateContent response"
            ),
        }
    }
}

/// What the interception layer did with one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Served(Endpoint),
    Rewritten,
    Observed,
    PassedThrough,
}

enum Routing {
    Serve(HostResponse, Endpoint),
    Forward {
        request: HostRequest,
        observe: bool,
        rewritten: bool,
    },
}

pub struct Interceptor {
    matcher: EndpointMatcher,
    scheduler: Arc<InjectionScheduler>,
    bus: Arc<EventBus>,
}

impl Interceptor {
    pub fn new(matcher: EndpointMatcher, scheduler: Arc<InjectionScheduler>, bus: Arc<EventBus>) -> Self {
        Self {
            matcher,
            scheduler,
            bus,
        }
    }

    fn route(&self, mut request: HostRequest) -> Routing {
        let endpoint = self.matcher.classify(&request.url);
        let mut rewritten = false;

        if endpoint == Some(Endpoint::CreatePrompt) && self.scheduler.has_pending() {
            let replacement = request
                .body_text()
                .and_then(|body| self.scheduler.try_rewrite(&body));
            if let Some(replacement) = replacement {
                request.body = Some(RequestBody::Text(replacement));
                rewritten = true;
            }
        }

        if let Some(endpoint) = endpoint
            && let Some(served) = self.scheduler.try_serve(endpoint)
        {
            debug!(target: "compressor::net", url = %request.url, ?endpoint, "serving synthetic response");
            return Routing::Serve(HostResponse::synthetic(served.body), endpoint);
        }

        Routing::Forward {
            observe: endpoint == Some(Endpoint::GenerateContent),
            request,
            rewritten,
        }
    }

    fn resolved_url(&self, url: &str) -> String {
        self.matcher
            .resolve(url)
            .map(|resolved| resolved.to_string())
            .unwrap_or_else(|| url.to_string())
    }

    fn publish_request(&self, request: &HostRequest) {
        self.bus.publish(&TrafficEvent::Request {
            url: self.resolved_url(&request.url),
            headers: request.headers.clone(),
            body_text: request.body_text().map(Cow::into_owned),
        });
    }

    fn publish_response(&self, url: &str, response: &HostResponse) {
        self.bus.publish(&TrafficEvent::Response {
            url: self.resolved_url(url),
            status: response.status,
            status_text: response.status_text.clone(),
            body_text: response.text().map(str::to_string),
        });
    }
}

/// Wrapper for the promise-style interface. It is itself a [`Transport`], so
/// it can be installed in place of the one it wraps.
pub struct InterceptedFetch {
    inner: Arc<dyn Transport>,
    interceptor: Arc<Interceptor>,
}

impl InterceptedFetch {
    pub fn new(inner: Arc<dyn Transport>, interceptor: Arc<Interceptor>) -> Self {
        Self { inner, interceptor }
    }

    pub async fn dispatch_traced(&self, request: HostRequest) -> Result<(HostResponse, Disposition)> {
        let (request, observe, rewritten) = match self.interceptor.route(request) {
            Routing::Serve(response, endpoint) => {
                return Ok((response, Disposition::Served(endpoint)));
            }
            Routing::Forward {
                request,
                observe,
                rewritten,
            } => (request, observe, rewritten),
        };

        if observe {
            self.interceptor.publish_request(&request);
        }
        let url = request.url.clone();
        let response = self.inner.dispatch(request).await?;
        if observe {
            self.interceptor.publish_response(&url, &response);
        }

        let disposition = if rewritten {
            Disposition::Rewritten
        } else if observe {
            Disposition::Observed
        } else {
            Disposition::PassedThrough
        };
        Ok((response, disposition))
    }
}

#[async_trait]
impl Transport for InterceptedFetch {
    async fn dispatch(&self, request: HostRequest) -> Result<HostResponse> {
        Ok(self.dispatch_traced(request).await?.0)
    }
}

/// Wrapper for the completion-callback interface.
pub struct InterceptedXhr {
    inner: Arc<dyn CallbackTransport>,
    interceptor: Arc<Interceptor>,
}

impl InterceptedXhr {
    pub fn new(inner: Arc<dyn CallbackTransport>, interceptor: Arc<Interceptor>) -> Self {
        Self { inner, interceptor }
    }
}

impl CallbackTransport for InterceptedXhr {
    fn send(&self, request: HostRequest, done: Completion) {
        let (request, observe) = match self.interceptor.route(request) {
            Routing::Serve(response, _) => {
                done(Ok(response));
                return;
            }
            Routing::Forward {
                request, observe, ..
            } => (request, observe),
        };

        if !observe {
            self.inner.send(request, done);
            return;
        }

        self.interceptor.publish_request(&request);
        let interceptor = Arc::clone(&self.interceptor);
        let url = request.url.clone();
        self.inner.send(
            request,
            Box::new(move |result: Result<HostResponse>| {
                if let Ok(response) = &result {
                    interceptor.publish_response(&url, response);
                }
                done(result);
            }),
        );
    }
}

/// One same-origin-or-not execution context that owns a pair of request
/// interfaces (the top window, or an embedded frame).
pub trait HostContext: Send + Sync {
    fn label(&self) -> String;
    fn is_same_origin(&self) -> bool;
    fn has_marker(&self, marker: &str) -> bool;
    fn set_marker(&self, marker: &str);
    fn fetch(&self) -> Option<Arc<dyn Transport>>;
    fn install_fetch(&self, wrapped: Arc<dyn Transport>);
    fn xhr(&self) -> Option<Arc<dyn CallbackTransport>>;
    fn install_xhr(&self, wrapped: Arc<dyn CallbackTransport>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookStatus {
    Installed,
    AlreadyHooked,
    Unavailable,
    CrossOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HookReport {
    pub fetch: HookStatus,
    pub xhr: HookStatus,
}

pub struct HookRegistry {
    interceptor: Arc<Interceptor>,
}

impl HookRegistry {
    pub fn new(interceptor: Arc<Interceptor>) -> Self {
        Self { interceptor }
    }

    /// Install both wrappers in `ctx` unless they are already there. Safe to
    /// call on every lifecycle tick.
    pub fn ensure_hooked(&self, ctx: &dyn HostContext) -> HookReport {
        let label = ctx.label();
        if !ctx.is_same_origin() {
            debug!(target: "compressor::net", %label, "skip hooking: cross-origin context");
            return HookReport {
                fetch: HookStatus::CrossOrigin,
                xhr: HookStatus::CrossOrigin,
            };
        }
        HookReport {
            fetch: self.hook_fetch(ctx, &label),
            xhr: self.hook_xhr(ctx, &label),
        }
    }

    pub fn ensure_hooked_all(&self, contexts: &[&dyn HostContext]) -> Vec<HookReport> {
        contexts.iter().map(|ctx| self.ensure_hooked(*ctx)).collect()
    }

    fn hook_fetch(&self, ctx: &dyn HostContext, label: &str) -> HookStatus {
        if ctx.has_marker(FETCH_HOOK_MARKER) {
            return HookStatus::AlreadyHooked;
        }
        let Some(original) = ctx.fetch() else {
            warn!(target: "compressor::net", %label, "skip hooking: fetch not available");
            return HookStatus::Unavailable;
        };
        ctx.install_fetch(Arc::new(InterceptedFetch::new(
            original,
            Arc::clone(&self.interceptor),
        )));
        ctx.set_marker(FETCH_HOOK_MARKER);
        info!(target: "compressor::net", %label, "fetch hooked");
        HookStatus::Installed
    }

    fn hook_xhr(&self, ctx: &dyn HostContext, label: &str) -> HookStatus {
        if ctx.has_marker(XHR_HOOK_MARKER) {
            return HookStatus::AlreadyHooked;
        }
        let Some(original) = ctx.xhr() else {
            warn!(target: "compressor::net", %label, "skip hooking: XMLHttpRequest not available");
            return HookStatus::Unavailable;
        };
        ctx.install_xhr(Arc::new(InterceptedXhr::new(
            original,
            Arc::clone(&self.interceptor),
        )));
        ctx.set_marker(XHR_HOOK_MARKER);
        info!(target: "compressor::net", %label, "XMLHttpRequest hooked");
        HookStatus::Installed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compressor::wire::{ConversationTurn, Role};
    use serde_json::{Value, json};
    use std::collections::HashSet;

    const ORIGIN: &str = "https://aistudio.google.com";

    #[derive(Default)]
    struct RecordingTransport {
        seen: Mutex<Vec<HostRequest>>,
    }

    impl RecordingTransport {
        fn seen(&self) -> Vec<HostRequest> {
            self.seen.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn dispatch(&self, request: HostRequest) -> Result<HostResponse> {
            self.seen.lock().expect("lock").push(request);
            Ok(HostResponse {
                status: 200,
                status_text: "OK".to_string(),
                headers: Vec::new(),
                body: b"[\"real\"]".to_vec(),
            })
        }
    }

    impl CallbackTransport for RecordingTransport {
        fn send(&self, request: HostRequest, done: Completion) {
            self.seen.lock().expect("lock").push(request);
            done(Ok(HostResponse::synthetic("[\"real\"]")));
        }
    }

    #[derive(Default)]
    struct CollectingObserver {
        events: Mutex<Vec<TrafficEvent>>,
    }

    impl TrafficObserver for CollectingObserver {
        fn observe(&self, event: &TrafficEvent) {
            self.events.lock().expect("lock").push(event.clone());
        }
    }

    struct Harness {
        scheduler: Arc<InjectionScheduler>,
        observer: Arc<CollectingObserver>,
        interceptor: Arc<Interceptor>,
    }

    fn harness() -> Harness {
        let scheduler = Arc::new(InjectionScheduler::new());
        let bus = Arc::new(EventBus::new());
        let observer = Arc::new(CollectingObserver::default());
        bus.subscribe(observer.clone());
        let interceptor = Arc::new(Interceptor::new(
            EndpointMatcher::new(ORIGIN).expect("matcher"),
            Arc::clone(&scheduler),
            bus,
        ));
        Harness {
            scheduler,
            observer,
            interceptor,
        }
    }

    fn url(endpoint: Endpoint) -> String {
        endpoint.path_suffix()
    }

    fn tail() -> Vec<ConversationTurn> {
        vec![ConversationTurn::synthetic(Role::User, "q")]
    }

    #[test]
    fn classifies_relative_and_absolute_urls() {
        let matcher = EndpointMatcher::new(ORIGIN).expect("matcher");
        assert_eq!(
            matcher.classify(&url(Endpoint::GenerateContent)),
            Some(Endpoint::GenerateContent)
        );
        let absolute = format!("https://alkalimakersuite-pa.clients6.google.com{}?alt=json", url(Endpoint::ListPrompts));
        assert_eq!(matcher.classify(&absolute), Some(Endpoint::ListPrompts));
        assert_eq!(matcher.classify("/app/prompts/abc"), None);
    }

    #[tokio::test]
    async fn generate_content_is_observed_and_forwarded() {
        let h = harness();
        let inner = Arc::new(RecordingTransport::default());
        let fetch = InterceptedFetch::new(inner.clone(), Arc::clone(&h.interceptor));

        let (response, disposition) = fetch
            .dispatch_traced(HostRequest::post(url(Endpoint::GenerateContent), "[1]"))
            .await
            .expect("dispatch");
        assert_eq!(disposition, Disposition::Observed);
        assert_eq!(response.text(), Some("[\"real\"]"));
        assert_eq!(inner.seen().len(), 1);

        let events = h.observer.events.lock().expect("lock").clone();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            TrafficEvent::Request { url, body_text: Some(body), .. }
                if body == "[1]" && url.starts_with(ORIGIN)
        ));
        assert!(matches!(&events[1], TrafficEvent::Response { status: 200, .. }));
    }

    #[tokio::test]
    async fn undecodable_body_is_published_as_none() {
        let h = harness();
        let fetch = InterceptedFetch::new(Arc::new(RecordingTransport::default()), Arc::clone(&h.interceptor));
        let mut request = HostRequest::post(url(Endpoint::GenerateContent), "");
        request.body = Some(RequestBody::Bytes(vec![0xff, 0xfe]));
        fetch.dispatch(request).await.expect("dispatch");

        let events = h.observer.events.lock().expect("lock").clone();
        assert!(matches!(&events[0], TrafficEvent::Request { body_text: None, .. }));
    }

    #[tokio::test]
    async fn pending_injection_serves_resolve_and_list_without_network() {
        let h = harness();
        let inner = Arc::new(RecordingTransport::default());
        let fetch = InterceptedFetch::new(inner.clone(), Arc::clone(&h.interceptor));
        let pending = h.scheduler.prepare("SUMMARY", tail());

        let (resolve, disposition) = fetch
            .dispatch_traced(HostRequest::post(url(Endpoint::ResolveDriveResource), "[]"))
            .await
            .expect("resolve");
        assert_eq!(disposition, Disposition::Served(Endpoint::ResolveDriveResource));
        assert_eq!(resolve.text(), Some(pending.resolve_body.as_str()));
        assert_eq!(resolve.header("Content-Type"), Some(SYNTHETIC_CONTENT_TYPE));

        let (_, disposition) = fetch
            .dispatch_traced(HostRequest::post(url(Endpoint::ListPrompts), "[]"))
            .await
            .expect("list");
        assert_eq!(disposition, Disposition::Served(Endpoint::ListPrompts));
        assert!(inner.seen().is_empty());

        let (_, disposition) = fetch
            .dispatch_traced(HostRequest::post(url(Endpoint::ListPrompts), "[]"))
            .await
            .expect("list again");
        assert_eq!(disposition, Disposition::PassedThrough);
        assert_eq!(inner.seen().len(), 1);
    }

    #[tokio::test]
    async fn create_prompt_body_is_rewritten_once() {
        let h = harness();
        let inner = Arc::new(RecordingTransport::default());
        let fetch = InterceptedFetch::new(inner.clone(), Arc::clone(&h.interceptor));
        h.scheduler.prepare("SUMMARY", tail());

        let mut root = vec![Value::Null; 14];
        root[13] = json!([[["old"]]]);
        let body = json!([root]).to_string();
        let (_, disposition) = fetch
            .dispatch_traced(HostRequest::post(url(Endpoint::CreatePrompt), body.clone()))
            .await
            .expect("create");
        assert_eq!(disposition, Disposition::Rewritten);
        assert!(!h.scheduler.has_pending());

        let sent = inner.seen();
        let sent_body = sent[0].body_text().expect("text").into_owned();
        let parsed: Value = serde_json::from_str(&sent_body).expect("json");
        assert_eq!(parsed[0][13][0][0][0], json!("SUMMARY"));
    }

    #[tokio::test]
    async fn malformed_create_prompt_passes_through_and_keeps_pending() {
        let h = harness();
        let inner = Arc::new(RecordingTransport::default());
        let fetch = InterceptedFetch::new(inner.clone(), Arc::clone(&h.interceptor));
        h.scheduler.prepare("SUMMARY", tail());

        let (_, disposition) = fetch
            .dispatch_traced(HostRequest::post(url(Endpoint::CreatePrompt), "{}"))
            .await
            .expect("create");
        assert_eq!(disposition, Disposition::PassedThrough);
        assert_eq!(inner.seen()[0].body_text().as_deref(), Some("{}"));
        assert!(h.scheduler.has_pending());
    }

    #[test]
    fn callback_wrapper_serves_and_observes() {
        let h = harness();
        let inner = Arc::new(RecordingTransport::default());
        let xhr = InterceptedXhr::new(inner.clone(), Arc::clone(&h.interceptor));
        h.scheduler.prepare("SUMMARY", tail());

        let served = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&served);
        xhr.send(
            HostRequest::post(url(Endpoint::ResolveDriveResource), "[]"),
            Box::new(move |result: Result<HostResponse>| {
                *slot.lock().expect("lock") = result.ok();
            }),
        );
        let served = served.lock().expect("lock").clone().expect("served");
        assert_eq!(served.status, 200);
        assert!(inner.seen().is_empty());

        xhr.send(
            HostRequest::post(url(Endpoint::GenerateContent), "[2]"),
            Box::new(|result: Result<HostResponse>| assert!(result.is_ok())),
        );
        assert_eq!(inner.seen().len(), 1);
        assert_eq!(h.observer.events.lock().expect("lock").len(), 2);
    }

    struct FakeContext {
        same_origin: bool,
        markers: Mutex<HashSet<String>>,
        fetch: Mutex<Option<Arc<dyn Transport>>>,
        xhr: Mutex<Option<Arc<dyn CallbackTransport>>>,
        installs: Mutex<usize>,
    }

    impl FakeContext {
        fn new(same_origin: bool) -> Self {
            let transport = Arc::new(RecordingTransport::default());
            let fetch: Arc<dyn Transport> = transport.clone();
            let xhr: Arc<dyn CallbackTransport> = transport;
            Self {
                same_origin,
                markers: Mutex::new(HashSet::new()),
                fetch: Mutex::new(Some(fetch)),
                xhr: Mutex::new(Some(xhr)),
                installs: Mutex::new(0),
            }
        }
    }

    impl HostContext for FakeContext {
        fn label(&self) -> String {
            "test-window".to_string()
        }
        fn is_same_origin(&self) -> bool {
            self.same_origin
        }
        fn has_marker(&self, marker: &str) -> bool {
            self.markers.lock().expect("lock").contains(marker)
        }
        fn set_marker(&self, marker: &str) {
            self.markers.lock().expect("lock").insert(marker.to_string());
        }
        fn fetch(&self) -> Option<Arc<dyn Transport>> {
            self.fetch.lock().expect("lock").clone()
        }
        fn install_fetch(&self, wrapped: Arc<dyn Transport>) {
            *self.installs.lock().expect("lock") += 1;
            *self.fetch.lock().expect("lock") = Some(wrapped);
        }
        fn xhr(&self) -> Option<Arc<dyn CallbackTransport>> {
            self.xhr.lock().expect("lock").clone()
        }
        fn install_xhr(&self, wrapped: Arc<dyn CallbackTransport>) {
            *self.installs.lock().expect("lock") += 1;
            *self.xhr.lock().expect("lock") = Some(wrapped);
        }
    }

    #[test]
    fn ensure_hooked_is_idempotent() {
        let h = harness();
        let registry = HookRegistry::new(Arc::clone(&h.interceptor));
        let ctx = FakeContext::new(true);

        let first = registry.ensure_hooked(&ctx);
        assert_eq!(first.fetch, HookStatus::Installed);
        assert_eq!(first.xhr, HookStatus::Installed);
        let second = registry.ensure_hooked(&ctx);
        assert_eq!(second.fetch, HookStatus::AlreadyHooked);
        assert_eq!(second.xhr, HookStatus::AlreadyHooked);
        assert_eq!(*ctx.installs.lock().expect("lock"), 2);
    }

    #[test]
    fn cross_origin_and_missing_interfaces_are_skipped() {
        let h = harness();
        let registry = HookRegistry::new(Arc::clone(&h.interceptor));
        let foreign = FakeContext::new(false);
        let bare = FakeContext::new(true);
        *bare.xhr.lock().expect("lock") = None;

        let reports = registry.ensure_hooked_all(&[&foreign, &bare]);
        assert_eq!(reports[0].fetch, HookStatus::CrossOrigin);
        assert_eq!(reports[1].fetch, HookStatus::Installed);
        assert_eq!(reports[1].xhr, HookStatus::Unavailable);
        assert_eq!(*foreign.installs.lock().expect("lock"), 0);
    }
}
