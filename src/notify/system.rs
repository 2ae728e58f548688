//! Default channel implementations backed by the host platform.
//!
//! Sounds and toasts shell out to whatever helper the platform ships
//! (`afplay`, `paplay`, `notify-send`, `osascript`, PowerShell), located with
//! `which`. Manual tones are synthesized and played through `cpal`. The
//! modal uses `rfd`, which does not depend on the host UI toolkit.

use std::ffi::OsString;
use std::io::{IsTerminal, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{debug, error, warn};

use crate::notify::channels::{ChannelError, ChannelResult, ModalAlert, Sounder, ToastRequest, Toaster, ToneSpec};

/// Peak amplitude of a synthesized tone.
const TONE_AMPLITUDE: f32 = 0.3;

/// Linear fade at both ends of a tone, so it starts and stops without a click.
const TONE_FADE: Duration = Duration::from_millis(10);

/// Extra time the output device gets to drain a tone before we give up.
const TONE_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// A dialog that is still open after this long is taken as shown.
const MODAL_SETTLE: Duration = Duration::from_millis(300);

/// Candidate (program, args) pairs for the platform alert sound, tried in order.
fn alert_sound_commands() -> Vec<(&'static str, Vec<String>)> {
    if cfg!(target_os = "macos") {
        vec![("afplay", vec!["/System/Library/Sounds/Glass.aiff".to_string()])]
    } else if cfg!(target_os = "windows") {
        vec![(
            "powershell",
            vec![
                "-NoProfile".to_string(),
                "-Command".to_string(),
                "[System.Media.SystemSounds]::Asterisk.Play()".to_string(),
            ],
        )]
    } else {
        vec![
            ("canberra-gtk-play", vec!["-i".to_string(), "bell".to_string()]),
            (
                "paplay",
                vec!["/usr/share/sounds/freedesktop/stereo/bell.oga".to_string()],
            ),
        ]
    }
}

fn find_program(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

/// Run a helper to completion, mapping a non-zero exit to `Failed`.
fn run_quiet(program: &PathBuf, args: &[String]) -> ChannelResult {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(ChannelError::Failed(format!(
            "{} exited with {}: {}",
            program.display(),
            output.status,
            stderr
        )))
    }
}

/// Sounds through platform helper programs, falling back to the terminal bell.
#[derive(Debug, Default, Clone)]
pub struct CommandSounder;

impl CommandSounder {
    pub fn new() -> Self {
        Self
    }
}

impl Sounder for CommandSounder {
    fn system_alert(&self) -> ChannelResult {
        let mut last_err = None;
        for (name, args) in alert_sound_commands() {
            let Some(program) = find_program(name) else {
                continue;
            };
            match run_quiet(&program, &args) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!(program = name, error = %e, "alert sound helper failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ChannelError::Unavailable("no alert sound helper installed".to_string())))
    }

    fn tone(&self, tone: ToneSpec) -> ChannelResult {
        match play_tone(tone) {
            Ok(()) => return Ok(()),
            Err(e) => debug!(error = %e, "audio device tone failed, trying helpers"),
        }

        if cfg!(target_os = "windows") {
            if let Some(ps) = find_program("powershell") {
                let script = format!("[console]::beep({},{})", tone.frequency_hz, tone.duration_ms);
                return run_quiet(&ps, &["-NoProfile".to_string(), "-Command".to_string(), script]);
            }
        } else if let Some(beep) = find_program("beep") {
            return run_quiet(
                &beep,
                &[
                    "-f".to_string(),
                    tone.frequency_hz.to_string(),
                    "-l".to_string(),
                    tone.duration_ms.to_string(),
                ],
            );
        }

        let mut stderr = std::io::stderr();
        if !stderr.is_terminal() {
            return Err(ChannelError::Unavailable(
                "no audio device, tone helper or terminal bell".to_string(),
            ));
        }
        stderr.write_all(b"\x07")?;
        stderr.flush()?;
        thread::sleep(tone.duration());
        Ok(())
    }
}

/// One channel of a sine wave for `tone`, faded in and out.
fn sine_samples(tone: ToneSpec, sample_rate: u32) -> Vec<f32> {
    let rate = sample_rate as f32;
    let total = (u64::from(sample_rate) * tone.duration_ms / 1000) as usize;
    let fade = ((rate * TONE_FADE.as_secs_f32()) as usize).clamp(1, total.max(1));
    let step = std::f32::consts::TAU * tone.frequency_hz as f32 / rate;

    (0..total)
        .map(|n| {
            let edge = n.min(total - 1 - n);
            let gain = if edge < fade { edge as f32 / fade as f32 } else { 1.0 };
            (step * n as f32).sin() * TONE_AMPLITUDE * gain
        })
        .collect()
}

/// Playback progress shared with the output callback.
struct ToneBuffer {
    samples: Vec<f32>,
    position: usize,
    finished: bool,
}

/// Play `tone` on the default output device, blocking until it has played.
fn play_tone(tone: ToneSpec) -> ChannelResult {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| ChannelError::Unavailable("no default output device".to_string()))?;

    let supported = device
        .default_output_config()
        .map_err(|e| ChannelError::Unavailable(format!("no default output config: {e}")))?;
    if supported.sample_format() != cpal::SampleFormat::F32 {
        return Err(ChannelError::Unavailable(format!(
            "tone requires f32 output (got {:?})",
            supported.sample_format()
        )));
    }

    let channels = usize::from(supported.channels().max(1));
    let sample_rate = supported.sample_rate();
    let stream_config: cpal::StreamConfig = supported.into();

    let buffer = Arc::new(Mutex::new(ToneBuffer {
        samples: sine_samples(tone, sample_rate),
        position: 0,
        finished: false,
    }));
    let buffer_cb = Arc::clone(&buffer);

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let mut buf = match buffer_cb.lock() {
                    Ok(b) => b,
                    Err(_) => return,
                };
                for frame in data.chunks_mut(channels) {
                    let value = match buf.samples.get(buf.position) {
                        Some(&v) => {
                            buf.position += 1;
                            v
                        }
                        None => {
                            buf.finished = true;
                            0.0
                        }
                    };
                    frame.fill(value);
                }
            },
            move |err| {
                error!("tone output stream error: {err}");
            },
            None,
        )
        .map_err(|e| ChannelError::Failed(format!("failed to build output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| ChannelError::Failed(format!("failed to start output stream: {e}")))?;

    let deadline = Instant::now() + tone.duration() + TONE_DRAIN_GRACE;
    let outcome = loop {
        thread::sleep(Duration::from_millis(10));
        if buffer.lock().map(|b| b.finished).unwrap_or(true) {
            break Ok(());
        }
        if Instant::now() >= deadline {
            break Err(ChannelError::Failed("output device stalled while playing tone".to_string()));
        }
    };

    drop(stream);
    outcome
}

/// Desktop notifications via `notify-send` (freedesktop) or `osascript` (macOS).
#[derive(Debug, Default, Clone)]
pub struct CommandToaster;

impl CommandToaster {
    pub fn new() -> Self {
        Self
    }

    fn notify_send(program: &PathBuf, request: &ToastRequest) -> ChannelResult {
        let mut args = Vec::new();
        if let Some(duration) = request.duration {
            args.push("-t".to_string());
            args.push(duration.as_millis().to_string());
        }
        if let Some(app) = &request.app_name {
            args.push("-a".to_string());
            args.push(app.clone());
        }
        if let Some(icon) = &request.icon {
            args.push("-i".to_string());
            args.push(icon.clone());
        }
        args.push(request.title.clone());
        args.push(request.message.clone());

        match run_quiet(program, &args) {
            // Older notify-send builds reject -a/-t; let the caller retry without extras.
            Err(ChannelError::Failed(msg)) if !request.is_reduced() => Err(ChannelError::Rejected(msg)),
            other => other,
        }
    }

    fn osascript(program: &PathBuf, request: &ToastRequest) -> ChannelResult {
        let script = format!(
            "display notification \"{}\" with title \"{}\"",
            escape_applescript(&request.message),
            escape_applescript(&request.title)
        );
        run_quiet(program, &["-e".to_string(), script])
    }
}

impl Toaster for CommandToaster {
    fn show(&self, request: &ToastRequest) -> ChannelResult {
        if cfg!(target_os = "macos") {
            if let Some(program) = find_program("osascript") {
                return Self::osascript(&program, request);
            }
        } else if let Some(program) = find_program("notify-send") {
            return Self::notify_send(&program, request);
        }
        Err(ChannelError::Unavailable("no desktop notification helper found".to_string()))
    }
}

fn escape_applescript(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Whether a graphical session is reachable. Only X11 and Wayland desktops
/// are checked; other platforms always have one.
fn display_available(var: impl Fn(&str) -> Option<OsString>) -> bool {
    if cfg!(all(unix, not(target_os = "macos"))) {
        ["DISPLAY", "WAYLAND_DISPLAY"]
            .iter()
            .any(|name| var(name).is_some_and(|v| !v.is_empty()))
    } else {
        true
    }
}

/// How the dialog thread ended.
#[derive(Debug)]
enum DialogEnd {
    Closed,
    Panicked(String),
}

/// Decide the modal's outcome from its thread. A dialog still open after
/// `settle` counts as shown; one that ended sooner never reached the user.
fn settle_dialog(done: &mpsc::Receiver<DialogEnd>, settle: Duration) -> ChannelResult {
    match done.recv_timeout(settle) {
        Err(RecvTimeoutError::Timeout) => Ok(()),
        Ok(DialogEnd::Closed) => Err(ChannelError::Unavailable("dialog closed as soon as it opened".to_string())),
        Ok(DialogEnd::Panicked(msg)) => Err(ChannelError::Failed(format!("dialog panicked: {msg}"))),
        Err(RecvTimeoutError::Disconnected) => {
            Err(ChannelError::Failed("dialog thread exited without reporting".to_string()))
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Native message box. The dialog runs on its own thread; `show` waits
/// only long enough to learn whether it came up.
#[derive(Debug, Default, Clone)]
pub struct RfdModal;

impl RfdModal {
    pub fn new() -> Self {
        Self
    }
}

impl ModalAlert for RfdModal {
    fn show(&self, title: &str, body: &str) -> ChannelResult {
        if !display_available(|name| std::env::var_os(name)) {
            return Err(ChannelError::Unavailable("no graphical session".to_string()));
        }

        let title = title.to_string();
        let body = body.to_string();
        let (done_tx, done_rx) = mpsc::channel();
        thread::Builder::new()
            .name("tasky-modal".to_string())
            .spawn(move || {
                let shown = panic::catch_unwind(AssertUnwindSafe(|| {
                    rfd::MessageDialog::new()
                        .set_level(rfd::MessageLevel::Warning)
                        .set_title(title.as_str())
                        .set_description(body.as_str())
                        .set_buttons(rfd::MessageButtons::Ok)
                        .show()
                }));
                let end = match shown {
                    Ok(_) => DialogEnd::Closed,
                    Err(payload) => DialogEnd::Panicked(panic_message(payload.as_ref())),
                };
                let _ = done_tx.send(end);
            })?;

        let result = settle_dialog(&done_rx, MODAL_SETTLE);
        if let Err(e) = &result {
            warn!(error = %e, "modal dialog did not appear");
        }
        result
    }
}
