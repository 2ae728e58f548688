//! Recording channel doubles for hosts that want to exercise the
//! notification core without touching the desktop (tests, headless runs).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::domain::TaskId;
use crate::notify::channels::{
    ChannelError, ChannelResult, HostWindow, ModalAlert, PopupContent, Sounder, ToastRequest, Toaster, ToneSpec,
};

/// Counts alert sounds and tones; either can be told to fail.
#[derive(Debug, Default)]
pub struct MockSounder {
    alerts: AtomicUsize,
    tones: AtomicUsize,
    fail_alerts: bool,
    fail_tones: bool,
}

impl MockSounder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Both mechanisms fail.
    pub fn failing() -> Self {
        Self {
            fail_alerts: true,
            fail_tones: true,
            ..Self::default()
        }
    }

    pub fn with_failing_alerts(mut self) -> Self {
        self.fail_alerts = true;
        self
    }

    pub fn with_failing_tones(mut self) -> Self {
        self.fail_tones = true;
        self
    }

    /// Attempts, successful or not.
    pub fn alert_count(&self) -> usize {
        self.alerts.load(Ordering::SeqCst)
    }

    /// Attempts, successful or not.
    pub fn tone_count(&self) -> usize {
        self.tones.load(Ordering::SeqCst)
    }
}

impl Sounder for MockSounder {
    fn system_alert(&self) -> ChannelResult {
        self.alerts.fetch_add(1, Ordering::SeqCst);
        if self.fail_alerts {
            return Err(ChannelError::Unavailable("mock alert sound disabled".to_string()));
        }
        Ok(())
    }

    fn tone(&self, _tone: ToneSpec) -> ChannelResult {
        self.tones.fetch_add(1, Ordering::SeqCst);
        if self.fail_tones {
            return Err(ChannelError::Unavailable("mock tone disabled".to_string()));
        }
        Ok(())
    }
}

/// How a [`MockToaster`] responds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastBehavior {
    Accept,
    /// Reject anything but the reduced title+message shape.
    RejectExtras,
    Fail,
    /// The backend is gone for good.
    Invalidate,
}

/// Records every toast request it sees.
#[derive(Debug)]
pub struct MockToaster {
    behavior: ToastBehavior,
    requests: Mutex<Vec<ToastRequest>>,
}

impl MockToaster {
    pub fn new(behavior: ToastBehavior) -> Self {
        Self {
            behavior,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ToastRequest> {
        self.requests.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl Toaster for MockToaster {
    fn show(&self, request: &ToastRequest) -> ChannelResult {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(request.clone());
        match self.behavior {
            ToastBehavior::Accept => Ok(()),
            ToastBehavior::RejectExtras if request.is_reduced() => Ok(()),
            ToastBehavior::RejectExtras => Err(ChannelError::Rejected("unexpected keyword argument".to_string())),
            ToastBehavior::Fail => Err(ChannelError::Failed("toast service down".to_string())),
            ToastBehavior::Invalidate => Err(ChannelError::Invalidated("notification daemon gone".to_string())),
        }
    }
}

/// Records modal titles and bodies.
#[derive(Debug, Default)]
pub struct MockModal {
    fail: bool,
    shown: Mutex<Vec<(String, String)>>,
}

impl MockModal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn shown(&self) -> Vec<(String, String)> {
        self.shown.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl ModalAlert for MockModal {
    fn show(&self, title: &str, body: &str) -> ChannelResult {
        self.shown
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((title.to_string(), body.to_string()));
        if self.fail {
            return Err(ChannelError::Failed("no display".to_string()));
        }
        Ok(())
    }
}

/// A host window that can be "destroyed" at will.
#[derive(Debug, Default)]
pub struct MockWindow {
    destroyed: AtomicBool,
    /// Report alive but fail the popup call as a destroyed window would.
    dies_on_popup: AtomicBool,
    popups: Mutex<Vec<PopupContent>>,
    flashes: AtomicUsize,
}

impl MockWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }

    pub fn die_on_next_popup(&self) {
        self.dies_on_popup.store(true, Ordering::SeqCst);
    }

    pub fn popups(&self) -> Vec<PopupContent> {
        self.popups.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn flash_count(&self) -> usize {
        self.flashes.load(Ordering::SeqCst)
    }
}

impl HostWindow for MockWindow {
    fn is_alive(&self) -> bool {
        !self.destroyed.load(Ordering::SeqCst)
    }

    fn show_popup(&self, popup: &PopupContent) -> ChannelResult {
        if self.dies_on_popup.swap(false, Ordering::SeqCst) {
            self.destroy();
            return Err(ChannelError::Invalidated("wrapped C/C++ object has been deleted".to_string()));
        }
        if !self.is_alive() {
            return Err(ChannelError::Invalidated("window destroyed".to_string()));
        }
        self.popups
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(popup.clone());
        Ok(())
    }

    fn flash(&self, _task_id: TaskId) -> ChannelResult {
        self.flashes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
