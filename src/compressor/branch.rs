//! Drives the host's "Branch from here" flow so the reconstructed history is
//! loaded into a fresh thread.

use crate::compressor::config::TimingConfig;
use crate::compressor::injection::InjectionScheduler;
use crate::compressor::poll::poll_until;
use crate::error::CompressorError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

pub const CHAT_TURN_SELECTOR: &str = "ms-chat-turn";
pub const MENU_TRIGGER_SELECTORS: [&str; 4] = [
    r#"button[aria-label="More actions"]"#,
    r#"button[aria-label="More options"]"#,
    r#"button[aria-haspopup="menu"]"#,
    "button.mat-mdc-menu-trigger",
];
pub const MENU_ITEM_SELECTOR: &str = r#"button[role="menuitem"], button.mat-mdc-menu-item"#;
pub const BRANCH_ITEM_LABEL: &str = "Branch from here";

const MENU_MISSING_NOTICE: &str =
    "Could not locate the Branch menu. Make sure a conversation is open.";

/// Opaque reference to a node in a host document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeHandle(pub String);

/// Everything the core needs from the host page.
pub trait HostUi: Send + Sync {
    /// The top document first, then any same-origin embedded documents.
    fn documents(&self) -> Vec<NodeHandle>;
    fn query_all(&self, scope: &NodeHandle, selector: &str) -> Vec<NodeHandle>;
    fn text_content(&self, node: &NodeHandle) -> Option<String>;
    fn click(&self, node: &NodeHandle) -> Result<(), CompressorError>;
    /// Path component of the current location.
    fn current_path(&self) -> String;
    /// Blocking message to the user.
    fn notify_user(&self, message: &str);
    fn set_button_loading(&self, loading: bool);
    fn has_prompt_input(&self) -> bool;
    /// Put `prompt` in the input box and send it.
    fn submit_prompt(&self, prompt: &str) -> Result<(), CompressorError>;

    fn query_one(&self, scope: &NodeHandle, selector: &str) -> Option<NodeHandle> {
        self.query_all(scope, selector).into_iter().next()
    }
}

/// Route id of `/prompts/<id>` paths.
pub fn prompt_id_from_path(path: &str) -> Option<String> {
    let (_, rest) = path.split_once("/prompts/")?;
    let id = rest
        .split(['/', '?', '#'])
        .next()
        .filter(|id| !id.is_empty())?;
    Some(id.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchOutcome {
    Branched { route_id: String },
    RouteUnchanged { previous: Option<String> },
}

pub struct BranchSequencer {
    ui: Arc<dyn HostUi>,
    scheduler: Arc<InjectionScheduler>,
    timing: TimingConfig,
    running: AtomicBool,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl BranchSequencer {
    pub fn new(ui: Arc<dyn HostUi>, scheduler: Arc<InjectionScheduler>, timing: TimingConfig) -> Self {
        Self {
            ui,
            scheduler,
            timing,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn branch_from_here(&self) -> Result<BranchOutcome, CompressorError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!(target: "compressor::ui", "branch automation already running, please wait");
            return Err(CompressorError::BranchBusy);
        }
        let _guard = RunningGuard(&self.running);

        info!(target: "compressor::net", "attempting to branch from current turn");
        let previous = prompt_id_from_path(&self.ui.current_path());

        if let Err(err) = self.open_branch_menu().await {
            warn!(target: "compressor::net", "branch automation failed: {err}");
            self.scheduler.discard();
            let notice = match &err {
                CompressorError::MenuNotFound(_) => MENU_MISSING_NOTICE.to_string(),
                other => format!("Branch from here failed: {other}"),
            };
            self.ui.notify_user(&notice);
            return Err(err);
        }

        info!(target: "compressor::ui", "branch from here clicked, waiting for new prompt to load");
        match self.wait_for_prompt_change(previous.as_deref()).await {
            Ok(route_id) => {
                info!(target: "compressor::net", %route_id, "branch completed");
                Ok(BranchOutcome::Branched { route_id })
            }
            Err(err) => {
                warn!(target: "compressor::net", "prompt id did not change after branch: {err}");
                Ok(BranchOutcome::RouteUnchanged { previous })
            }
        }
    }

    async fn open_branch_menu(&self) -> Result<(), CompressorError> {
        let trigger = poll_until(
            "branch menu trigger",
            self.timing.poll_interval(),
            self.timing.branch_menu_timeout(),
            || Ok(self.find_menu_trigger()),
        )
        .await
        .map_err(|err| match err {
            CompressorError::AutomationTimeout { .. } => CompressorError::MenuNotFound(err.to_string()),
            other => other,
        })?;

        debug!(target: "compressor::net", "branch menu trigger located, opening menu");
        self.ui.click(&trigger)?;

        let item = poll_until(
            "branch menu item",
            self.timing.poll_interval(),
            self.timing.branch_menu_timeout(),
            || Ok(self.find_branch_item()),
        )
        .await?;
        debug!(target: "compressor::net", "branch menu item located, clicking");
        self.ui.click(&item)
    }

    /// Menu trigger on the second-to-last chat turn, else the last one.
    fn find_menu_trigger(&self) -> Option<NodeHandle> {
        for doc in self.ui.documents() {
            let turns = self.ui.query_all(&doc, CHAT_TURN_SELECTOR);
            if turns.is_empty() {
                continue;
            }
            let candidates = turns.iter().rev().take(2).rev();
            for turn in candidates {
                for selector in MENU_TRIGGER_SELECTORS {
                    if let Some(button) = self.ui.query_one(turn, selector) {
                        return Some(button);
                    }
                }
            }
        }
        None
    }

    fn find_branch_item(&self) -> Option<NodeHandle> {
        self.ui.documents().into_iter().find_map(|doc| {
            self.ui
                .query_all(&doc, MENU_ITEM_SELECTOR)
                .into_iter()
                .find(|item| {
                    self.ui
                        .text_content(item)
                        .is_some_and(|text| text.contains(BRANCH_ITEM_LABEL))
                })
        })
    }

    async fn wait_for_prompt_change(&self, previous: Option<&str>) -> Result<String, CompressorError> {
        poll_until(
            "prompt id change",
            self.timing.poll_interval(),
            self.timing.prompt_change_timeout(),
            || {
                let current = prompt_id_from_path(&self.ui.current_path());
                Ok(current.filter(|id| Some(id.as_str()) != previous))
            },
        )
        .await
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FakePage, node};
    use super::*;

    fn sequencer(page: Arc<FakePage>, scheduler: Arc<InjectionScheduler>) -> BranchSequencer {
        BranchSequencer::new(page, scheduler, TimingConfig::default())
    }

    #[test]
    fn prompt_id_is_taken_from_route() {
        assert_eq!(prompt_id_from_path("/prompts/abc123").as_deref(), Some("abc123"));
        assert_eq!(prompt_id_from_path("/app/prompts/x-y/edit").as_deref(), Some("x-y"));
        assert_eq!(prompt_id_from_path("/prompts/new_chat?mode=1").as_deref(), Some("new_chat"));
        assert_eq!(prompt_id_from_path("/library"), None);
        assert_eq!(prompt_id_from_path("/prompts/"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn clicks_second_to_last_trigger_then_branch_item() {
        let mut page = FakePage::with_chat(3, "/prompts/old");
        page.navigate_on_click
            .insert("branch-item".to_string(), "/prompts/new".to_string());
        let page = Arc::new(page);
        let scheduler = Arc::new(InjectionScheduler::new());

        let outcome = sequencer(page.clone(), scheduler)
            .branch_from_here()
            .await
            .expect("branch");
        assert_eq!(
            outcome,
            BranchOutcome::Branched {
                route_id: "new".to_string()
            }
        );
        assert_eq!(page.clicks(), vec!["turn1-more", "branch-item"]);
    }

    #[tokio::test(start_paused = true)]
    async fn single_turn_uses_last_turn() {
        let page = Arc::new(FakePage::with_chat(1, "/prompts/old"));
        let outcome = sequencer(page.clone(), Arc::new(InjectionScheduler::new()))
            .branch_from_here()
            .await
            .expect("branch");
        assert_eq!(
            outcome,
            BranchOutcome::RouteUnchanged {
                previous: Some("old".to_string())
            }
        );
        assert_eq!(page.clicks(), vec!["turn0-more", "branch-item"]);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_trigger_discards_pending_and_notifies() {
        let page = Arc::new(FakePage {
            documents: vec![node("doc")],
            ..FakePage::default()
        });
        let scheduler = Arc::new(InjectionScheduler::new());
        scheduler.prepare("S", Vec::new());

        let err = sequencer(page.clone(), Arc::clone(&scheduler))
            .branch_from_here()
            .await
            .expect_err("no trigger");
        assert!(matches!(err, CompressorError::MenuNotFound(_)));
        assert!(!scheduler.has_pending());
        assert_eq!(page.notices(), vec![MENU_MISSING_NOTICE.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_menu_item_times_out() {
        let mut page = FakePage::with_chat(2, "/prompts/old");
        page.reveal_on_click.clear();
        let page = Arc::new(page);
        let scheduler = Arc::new(InjectionScheduler::new());
        scheduler.prepare("S", Vec::new());

        let err = sequencer(page.clone(), Arc::clone(&scheduler))
            .branch_from_here()
            .await
            .expect_err("no item");
        assert!(matches!(err, CompressorError::AutomationTimeout { ref label, .. } if label == "branch menu item"));
        assert!(!scheduler.has_pending());
        assert_eq!(page.notices().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_sequence_is_rejected() {
        let page = Arc::new(FakePage {
            documents: vec![node("doc")],
            ..FakePage::default()
        });
        let scheduler = Arc::new(InjectionScheduler::new());
        scheduler.prepare("S", Vec::new());
        let seq = Arc::new(sequencer(page, Arc::clone(&scheduler)));

        let first = tokio::spawn({
            let seq = Arc::clone(&seq);
            async move { seq.branch_from_here().await }
        });
        tokio::task::yield_now().await;
        assert!(seq.is_running());
        let second = seq.branch_from_here().await;
        assert!(matches!(second, Err(CompressorError::BranchBusy)));
        assert!(scheduler.has_pending());

        let first = first.await.expect("join");
        assert!(first.is_err());
        assert!(!seq.is_running());
    }
}
