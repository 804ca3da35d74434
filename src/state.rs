use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::contamination::{detect_with, remove_term, DetectedTerm, RewriteError, TermCatalog};
use crate::generation::error::{DispatchError, ValidationError};
use crate::generation::types::{
    DispatchState, GenerationDraft, GenerationMode, GenerationOutcome, Measurements,
    MotionSource, ReferenceImage, TerminalState, VideoSubMode,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A dismissible user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub id: u64,
    pub level: NoticeLevel,
    pub message: String,
}

/// Generated media, most recent first.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GenerationOutcome>,
}

impl Gallery {
    pub fn prepend(&mut self, outcome: GenerationOutcome) {
        self.entries.insert(0, outcome);
    }

    pub fn entries(&self) -> &[GenerationOutcome] {
        &self.entries
    }

    pub fn latest(&self) -> Option<&GenerationOutcome> {
        self.entries.first()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn remove(&mut self, id: &str) -> Option<GenerationOutcome> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        Some(self.entries.remove(index))
    }
}

struct SessionInner {
    draft: GenerationDraft,
    loading_references: usize,
    dispatch_state: DispatchState,
    last_error: Option<String>,
    gallery: Gallery,
    notices: Vec<Notice>,
    next_notice_id: u64,
}

impl SessionInner {
    fn push_notice(&mut self, level: NoticeLevel, message: String) {
        let id = self.next_notice_id;
        self.next_notice_id += 1;
        self.notices.push(Notice { id, level, message });
    }

    fn settle_terminal(&mut self) {
        if self.dispatch_state.is_terminal() {
            self.dispatch_state = DispatchState::Idle;
        }
    }
}

/// One user's studio session: the prompt being edited, attached references,
/// provider selection, dispatch state and gallery. Clones share the session.
#[derive(Clone)]
pub struct StudioSession {
    inner: Arc<Mutex<SessionInner>>,
}

/// Marks references as loading until dropped.
pub struct ReferenceLoadGuard {
    session: StudioSession,
}

impl Drop for ReferenceLoadGuard {
    fn drop(&mut self) {
        let mut inner = self.session.inner.lock();
        inner.loading_references = inner.loading_references.saturating_sub(1);
    }
}

impl StudioSession {
    pub fn new(provider_id: impl Into<String>, aspect_ratio: impl Into<String>) -> Self {
        let draft = GenerationDraft {
            prompt: String::new(),
            measurements: Measurements::default(),
            mode: GenerationMode::Image,
            video_sub_mode: VideoSubMode::default(),
            references: Vec::new(),
            source_image: None,
            motion: None,
            aspect_ratio: aspect_ratio.into(),
            provider_id: provider_id.into(),
        };
        Self {
            inner: Arc::new(Mutex::new(SessionInner {
                draft,
                loading_references: 0,
                dispatch_state: DispatchState::Idle,
                last_error: None,
                gallery: Gallery::default(),
                notices: Vec::new(),
                next_notice_id: 1,
            })),
        }
    }

    pub fn set_prompt(&self, prompt: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner.settle_terminal();
        inner.draft.prompt = prompt.into();
    }

    pub fn prompt(&self) -> String {
        self.inner.lock().draft.prompt.clone()
    }

    pub fn set_measurements(&self, measurements: Measurements) {
        self.inner.lock().draft.measurements = measurements;
    }

    pub fn set_mode(&self, mode: GenerationMode, video_sub_mode: VideoSubMode) {
        let mut inner = self.inner.lock();
        inner.draft.mode = mode;
        inner.draft.video_sub_mode = video_sub_mode;
    }

    pub fn set_provider(&self, provider_id: impl Into<String>) {
        self.inner.lock().draft.provider_id = provider_id.into();
    }

    pub fn set_aspect_ratio(&self, aspect_ratio: impl Into<String>) {
        self.inner.lock().draft.aspect_ratio = aspect_ratio.into();
    }

    pub fn set_motion(&self, motion: Option<MotionSource>) {
        self.inner.lock().draft.motion = motion;
    }

    pub fn attach_reference(&self, reference: ReferenceImage) {
        self.inner.lock().draft.references.push(reference);
    }

    pub fn remove_reference(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.draft.references.len();
        inner.draft.references.retain(|reference| reference.id != id);
        inner.draft.references.len() != before
    }

    pub fn set_source_image(&self, source: Option<ReferenceImage>) {
        self.inner.lock().draft.source_image = source;
    }

    pub fn begin_reference_load(&self) -> ReferenceLoadGuard {
        self.inner.lock().loading_references += 1;
        ReferenceLoadGuard {
            session: self.clone(),
        }
    }

    pub fn references_loading(&self) -> bool {
        self.inner.lock().loading_references > 0
    }

    pub fn draft(&self) -> GenerationDraft {
        self.inner.lock().draft.clone()
    }

    pub fn dispatch_state(&self) -> DispatchState {
        self.inner.lock().dispatch_state
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().last_error.clone()
    }

    pub fn gallery(&self) -> Gallery {
        self.inner.lock().gallery.clone()
    }

    pub fn remove_gallery_entry(&self, id: &str) -> Option<GenerationOutcome> {
        self.inner.lock().gallery.remove(id)
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.inner.lock().notices.clone()
    }

    /// Dismissing a notice is a user action, so a finished dispatch settles
    /// back to idle.
    pub fn dismiss_notice(&self, id: u64) {
        let mut inner = self.inner.lock();
        inner.notices.retain(|notice| notice.id != id);
        inner.settle_terminal();
    }

    pub fn detect_terms(&self, catalog: &TermCatalog) -> Vec<DetectedTerm> {
        detect_with(catalog, &self.inner.lock().draft.prompt)
    }

    pub fn remove_detected_term(&self, term: &DetectedTerm) -> Result<String, RewriteError> {
        let mut inner = self.inner.lock();
        let rewritten = remove_term(&inner.draft.prompt, term)?;
        inner.settle_terminal();
        inner.draft.prompt = rewritten.clone();
        Ok(rewritten)
    }

    /// Re-entrancy guard. Moves to `Validating` and snapshots the draft, or
    /// rejects without touching the dispatch state. The returned guard must
    /// be settled with `reject` or `finish`; dropping it early leaves the
    /// session re-submittable.
    pub(crate) fn try_begin_dispatch(
        &self,
    ) -> Result<(GenerationDraft, DispatchGuard), DispatchError> {
        let mut inner = self.inner.lock();
        if inner.dispatch_state.is_busy() {
            let err = DispatchError::Busy;
            inner.push_notice(NoticeLevel::Warning, err.to_string());
            return Err(err);
        }
        if inner.loading_references > 0 {
            let err = DispatchError::ReferencesLoading;
            inner.push_notice(NoticeLevel::Warning, err.to_string());
            return Err(err);
        }
        inner.dispatch_state = DispatchState::Validating;
        inner.last_error = None;
        let draft = inner.draft.clone();
        drop(inner);
        Ok((
            draft,
            DispatchGuard {
                session: self.clone(),
                settled: false,
            },
        ))
    }
}

/// One accepted dispatch. Dropped unsettled (cancelled future, panicking
/// backend) it moves the session out of its busy state.
pub(crate) struct DispatchGuard {
    session: StudioSession,
    settled: bool,
}

impl DispatchGuard {
    pub(crate) fn reject(mut self, err: &ValidationError) {
        self.settled = true;
        let mut inner = self.session.inner.lock();
        inner.dispatch_state = DispatchState::Idle;
        inner.push_notice(NoticeLevel::Warning, err.to_string());
    }

    pub(crate) fn mark_in_flight(&self) {
        self.session.inner.lock().dispatch_state = DispatchState::InFlight;
    }

    pub(crate) fn finish(mut self, outcome: &GenerationOutcome) {
        self.settled = true;
        let mut inner = self.session.inner.lock();
        match outcome.terminal_state {
            TerminalState::Success => {
                inner.dispatch_state = DispatchState::Success;
                inner.gallery.prepend(outcome.clone());
            }
            TerminalState::Error => {
                let message = outcome
                    .error_detail
                    .clone()
                    .unwrap_or_else(|| "Generation failed.".to_string());
                inner.dispatch_state = DispatchState::Error;
                inner.last_error = Some(message.clone());
                inner.push_notice(NoticeLevel::Error, message);
            }
        }
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut inner = self.session.inner.lock();
        match inner.dispatch_state {
            DispatchState::InFlight => {
                let message = INTERRUPTED_MESSAGE.to_string();
                inner.dispatch_state = DispatchState::Error;
                inner.last_error = Some(message.clone());
                inner.push_notice(NoticeLevel::Error, message);
            }
            DispatchState::Validating => {
                inner.dispatch_state = DispatchState::Idle;
                inner.push_notice(NoticeLevel::Warning, INTERRUPTED_MESSAGE.to_string());
            }
            _ => {}
        }
    }
}

const INTERRUPTED_MESSAGE: &str = "Generation was interrupted before it finished.";

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn outcome(id: &str) -> GenerationOutcome {
        GenerationOutcome {
            id: id.to_string(),
            result: None,
            echoed_prompt: "p".to_string(),
            timestamp: Utc::now(),
            terminal_state: TerminalState::Success,
            error_detail: None,
            mode: GenerationMode::Image,
            provider_id: "still".to_string(),
        }
    }

    #[test]
    fn gallery_is_most_recent_first() {
        let mut gallery = Gallery::default();
        gallery.prepend(outcome("a"));
        gallery.prepend(outcome("b"));
        assert_eq!(gallery.latest().unwrap().id, "b");
        assert_eq!(gallery.remove("a").unwrap().id, "a");
        assert_eq!(gallery.len(), 1);
        assert!(gallery.remove("missing").is_none());
    }

    #[test]
    fn loading_guard_blocks_dispatch_until_dropped() {
        let session = StudioSession::new("still", "1:1");
        let guard = session.begin_reference_load();
        assert!(matches!(
            session.try_begin_dispatch(),
            Err(DispatchError::ReferencesLoading)
        ));
        assert_eq!(session.dispatch_state(), DispatchState::Idle);
        assert_eq!(session.notices()[0].level, NoticeLevel::Warning);
        drop(guard);
        let (_, _dispatch) = session.try_begin_dispatch().unwrap();
        assert_eq!(session.dispatch_state(), DispatchState::Validating);
    }

    #[test]
    fn busy_session_rejects_without_state_change() {
        let session = StudioSession::new("still", "1:1");
        let (_, dispatch) = session.try_begin_dispatch().unwrap();
        dispatch.mark_in_flight();
        assert!(matches!(session.try_begin_dispatch(), Err(DispatchError::Busy)));
        assert_eq!(session.dispatch_state(), DispatchState::InFlight);
    }

    #[test]
    fn terminal_state_settles_on_next_user_action() {
        let session = StudioSession::new("still", "1:1");
        let (_, dispatch) = session.try_begin_dispatch().unwrap();
        dispatch.mark_in_flight();
        let mut failed = outcome("x");
        failed.terminal_state = TerminalState::Error;
        failed.error_detail = Some("quota exceeded".to_string());
        dispatch.finish(&failed);
        assert_eq!(session.dispatch_state(), DispatchState::Error);
        assert!(session.gallery().is_empty());

        let notice = session.notices().pop().unwrap();
        assert_eq!(notice.message, "quota exceeded");
        session.dismiss_notice(notice.id);
        assert!(session.notices().is_empty());
        assert_eq!(session.dispatch_state(), DispatchState::Idle);
    }

    #[test]
    fn prompt_terms_are_detected_and_removed_in_place() {
        let session = StudioSession::new("still", "1:1");
        session.set_prompt("Asian woman with long brown hair");
        let terms = session.detect_terms(TermCatalog::builtin());
        let hair = terms.last().unwrap().clone();
        assert_eq!(session.remove_detected_term(&hair).unwrap(), "Asian woman");
        assert_eq!(session.prompt(), "Asian woman");
        assert!(matches!(
            session.remove_detected_term(&hair),
            Err(RewriteError::StaleTerm { .. })
        ));
    }

    #[test]
    fn dropped_dispatch_guard_releases_the_session() {
        let session = StudioSession::new("still", "1:1");
        let (_, dispatch) = session.try_begin_dispatch().unwrap();
        drop(dispatch);
        assert_eq!(session.dispatch_state(), DispatchState::Idle);

        let (_, dispatch) = session.try_begin_dispatch().unwrap();
        dispatch.mark_in_flight();
        drop(dispatch);
        assert_eq!(session.dispatch_state(), DispatchState::Error);
        assert_eq!(session.last_error().as_deref(), Some(INTERRUPTED_MESSAGE));
        assert!(session.try_begin_dispatch().is_ok());
    }

    #[test]
    fn removing_a_term_settles_a_finished_dispatch() {
        let session = StudioSession::new("still", "1:1");
        session.set_prompt("woman with green eyes");
        let (_, dispatch) = session.try_begin_dispatch().unwrap();
        dispatch.mark_in_flight();
        dispatch.finish(&outcome("done"));
        assert_eq!(session.dispatch_state(), DispatchState::Success);

        let eyes = session.detect_terms(TermCatalog::builtin()).pop().unwrap();
        session.remove_detected_term(&eyes).unwrap();
        assert_eq!(session.dispatch_state(), DispatchState::Idle);
    }
}
