//! Audio collaborator seam. The core only ever decides *how long* to sound;
//! the device driver behind this trait is out of scope and replaceable.

use std::io::Write;
use std::time::Duration;
use tracing::info;

/// What the composer asked the audio side to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmCue {
    /// Play the alarm clip exactly once.
    Once,
    /// Loop the alarm clip for roughly this long.
    For(Duration),
}

pub trait AlarmSink: Send + Sync {
    fn play(&self, cue: AlarmCue);
}

/// Terminal-bell stand-in used when no real audio backend is wired up:
/// rings the bell and narrates the requested duration.
pub struct ConsoleBell;

impl ConsoleBell {
    pub fn open() -> anyhow::Result<Self> {
        // A real device driver would acquire the output line here and fail
        // the startup when it can't.
        Ok(Self)
    }
}

impl AlarmSink for ConsoleBell {
    fn play(&self, cue: AlarmCue) {
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(b"\x07");
        let _ = stderr.flush();
        match cue {
            AlarmCue::Once => info!("alarm: single play"),
            AlarmCue::For(duration) => {
                info!("alarm: looping for ~{} seconds", duration.as_secs())
            }
        }
    }
}
