//! # Presentation Side Effects
//!
//! Maps a record's severity to exactly one toast. The mapping is a pure
//! function; feeds compute a [`Toast`] while holding their state lock and
//! hand it to the [`Presenter`] only after releasing it, so presentation
//! never touches view state.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::locks::lock;
use crate::observability::Event;

/// Toast style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastKind {
    Error,
    Warning,
    Info,
    Success,
}

impl ToastKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToastKind::Error => "error",
            ToastKind::Warning => "warning",
            ToastKind::Info => "info",
            ToastKind::Success => "success",
        }
    }
}

/// Map a severity or event type to a toast style.
///
/// Unknown values fall back to [`ToastKind::Info`].
pub fn toast_kind_for(severity: &str) -> ToastKind {
    match severity.trim().to_ascii_lowercase().as_str() {
        "high" => ToastKind::Error,
        "medium" => ToastKind::Warning,
        "low" => ToastKind::Info,
        "success" => ToastKind::Success,
        _ => ToastKind::Info,
    }
}

/// A presentation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toast {
    pub kind: ToastKind,
    pub text: String,
}

impl Toast {
    /// Build a toast styled after `severity`
    pub fn for_severity(severity: &str, text: impl Into<String>) -> Self {
        Self {
            kind: toast_kind_for(severity),
            text: text.into(),
        }
    }
}

/// The presentation widget. Calls are fire-and-forget.
pub trait Presenter: Send + Sync {
    fn show_toast(&self, kind: ToastKind, text: &str);
}

/// Hand a toast to the presenter
pub fn dispatch(presenter: &dyn Presenter, toast: &Toast) {
    tracing::debug!(
        event = Event::ToastDispatched.as_str(),
        kind = toast.kind.as_str(),
        text = %toast.text,
        "dispatching toast"
    );
    presenter.show_toast(toast.kind, &toast.text);
}

/// Presenter that only logs; the default when no UI is attached
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPresenter;

impl Presenter for TracingPresenter {
    fn show_toast(&self, kind: ToastKind, text: &str) {
        tracing::info!(kind = kind.as_str(), text, "toast");
    }
}

/// Presenter that keeps every toast, for assertions
#[derive(Debug, Default)]
pub struct RecordingPresenter {
    toasts: Mutex<Vec<Toast>>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn toasts(&self) -> Vec<Toast> {
        lock(&self.toasts).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.toasts).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Presenter for RecordingPresenter {
    fn show_toast(&self, kind: ToastKind, text: &str) {
        lock(&self.toasts).push(Toast {
            kind,
            text: text.to_string(),
        });
    }
}
