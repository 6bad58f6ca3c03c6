//! Two-LED status signalling.
//!
//! The health flags are folded into one blink pattern per LED by an ordered
//! rule list. `Setup` overrides everything and makes both LEDs alternate.
//!
//! | LED   | first matching flag | pattern   |
//! |-------|---------------------|-----------|
//! | green | http_stacking       | fast      |
//! |       | http_unreachable    | slow      |
//! |       | (none)              | heartbeat |
//! | red   | mesh_setup          | heartbeat |
//! |       | mesh_crash          | triple    |
//! |       | mesh_stacking       | fast      |
//! |       | mesh_unreachable    | slow      |
//! |       | (none)              | off       |

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::state::{HealthFlag, HealthSnapshot, SharedHealth};

/// One LED state held for a duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub on: bool,
    pub duration: Duration,
}

const fn on(ms: u64) -> Step {
    Step {
        on: true,
        duration: Duration::from_millis(ms),
    }
}

const fn off(ms: u64) -> Step {
    Step {
        on: false,
        duration: Duration::from_millis(ms),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    Off,
    Heartbeat,
    Triple,
    Fast,
    Slow,
    /// Setup, first half on.
    SetupLead,
    /// Setup, second half on.
    SetupTrail,
}

impl Pattern {
    /// One cycle of the pattern; the driver repeats it.
    pub fn steps(self) -> &'static [Step] {
        const OFF: [Step; 1] = [off(500)];
        const HEARTBEAT: [Step; 4] = [on(100), off(100), on(100), off(700)];
        const TRIPLE: [Step; 6] = [on(100), off(100), on(100), off(100), on(100), off(600)];
        const FAST: [Step; 2] = [on(250), off(250)];
        const SLOW: [Step; 2] = [on(750), off(750)];
        const SETUP_LEAD: [Step; 2] = [on(250), off(250)];
        const SETUP_TRAIL: [Step; 2] = [off(250), on(250)];

        match self {
            Pattern::Off => &OFF,
            Pattern::Heartbeat => &HEARTBEAT,
            Pattern::Triple => &TRIPLE,
            Pattern::Fast => &FAST,
            Pattern::Slow => &SLOW,
            Pattern::SetupLead => &SETUP_LEAD,
            Pattern::SetupTrail => &SETUP_TRAIL,
        }
    }
}

/// Green LED: backend delivery.
pub fn green_pattern(flags: &HealthSnapshot) -> Pattern {
    if flags.is_set(HealthFlag::Setup) {
        Pattern::SetupLead
    } else if flags.is_set(HealthFlag::HttpStacking) {
        Pattern::Fast
    } else if flags.is_set(HealthFlag::HttpUnreachable) {
        Pattern::Slow
    } else {
        Pattern::Heartbeat
    }
}

/// Red LED: mesh radio.
pub fn red_pattern(flags: &HealthSnapshot) -> Pattern {
    const RULES: [(HealthFlag, Pattern); 4] = [
        (HealthFlag::MeshSetup, Pattern::Heartbeat),
        (HealthFlag::MeshCrash, Pattern::Triple),
        (HealthFlag::MeshStacking, Pattern::Fast),
        (HealthFlag::MeshUnreachable, Pattern::Slow),
    ];

    if flags.is_set(HealthFlag::Setup) {
        return Pattern::SetupTrail;
    }
    RULES
        .iter()
        .find(|(flag, _)| flags.is_set(*flag))
        .map_or(Pattern::Off, |(_, pattern)| *pattern)
}

/// A single on/off indicator.
pub trait Led: Send + 'static {
    fn name(&self) -> &str;
    fn set(&mut self, on: bool) -> io::Result<()>;
}

/// LED exposed by the kernel under `/sys/class/leds/<name>`.
///
/// When the LED is missing or not writable it is disabled and every `set`
/// becomes a no-op, so boards without LEDs still run.
#[derive(Debug)]
pub struct SysfsLed {
    name: String,
    brightness: Option<PathBuf>,
}

impl SysfsLed {
    pub const ROOT: &'static str = "/sys/class/leds";

    pub fn open(name: &str) -> Self {
        Self::open_in(Path::new(Self::ROOT), name)
    }

    /// Take the LED over from its kernel trigger.
    pub fn open_in(root: &Path, name: &str) -> Self {
        let dir = root.join(name);
        let brightness = match std::fs::write(dir.join("trigger"), "none") {
            Ok(()) => Some(dir.join("brightness")),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                error!("Missing permission to control LED {}; LED disabled", name);
                None
            }
            Err(e) => {
                error!("Cannot find LED {} ({}); LED disabled", name, e);
                None
            }
        };
        Self {
            name: name.to_string(),
            brightness,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.brightness.is_some()
    }
}

impl Led for SysfsLed {
    fn name(&self) -> &str {
        &self.name
    }

    fn set(&mut self, on: bool) -> io::Result<()> {
        match &self.brightness {
            Some(path) => std::fs::write(path, if on { "1" } else { "0" }),
            None => Ok(()),
        }
    }
}

/// Background tasks blinking the two LEDs.
pub struct StatusLeds {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl StatusLeds {
    pub fn start<G: Led, R: Led>(health: SharedHealth, green: G, red: R) -> Self {
        let cancel = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(drive(green, health.clone(), green_pattern, cancel.clone())),
            tokio::spawn(drive(red, health, red_pattern, cancel.clone())),
        ];
        Self { cancel, tasks }
    }

    /// Stop blinking and switch both LEDs off.
    pub async fn stop(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("LED task failed: {}", e);
            }
        }
    }
}

async fn drive<L: Led>(
    mut led: L,
    health: SharedHealth,
    select: fn(&HealthSnapshot) -> Pattern,
    cancel: CancellationToken,
) {
    let mut failing = false;
    let mut current = None;

    'outer: loop {
        let pattern = select(&health.snapshot());
        if current != Some(pattern) {
            debug!("LED {} -> {:?}", led.name(), pattern);
            current = Some(pattern);
        }

        for step in pattern.steps() {
            match led.set(step.on) {
                Ok(()) => failing = false,
                Err(e) if !failing => {
                    warn!("Cannot set LED {}: {}", led.name(), e);
                    failing = true;
                }
                Err(_) => {}
            }
            tokio::select! {
                _ = cancel.cancelled() => break 'outer,
                _ = sleep(step.duration) => {}
            }
        }
    }

    if let Err(e) = led.set(false) {
        warn!("Cannot switch off LED {}: {}", led.name(), e);
    }
}
