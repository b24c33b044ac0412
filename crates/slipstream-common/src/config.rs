// config.rs — runtime-settable engine variables
//
// Named string variables with a cached float value, settable at any time
// (typically from in-game UI). The sync-related vars get typed accessors so
// the estimator and broadcast code never parse strings in the hot path.

#[derive(Debug, Clone)]
pub struct Var {
    pub name: String,
    pub string: String,
    pub value: f32,
    pub modified: bool,
}

/// How a client runs a remote entity forward between snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EstimationMode {
    /// Apply each snapshot as-is.
    None,
    /// Integrate snapshot velocity forward by wall-clock elapsed time.
    #[default]
    Extrapolate,
    /// Render a fixed delay behind the newest snapshot.
    DelayedPlayback,
}

impl EstimationMode {
    pub fn from_value(v: f32) -> Self {
        match v as i32 {
            0 => EstimationMode::None,
            2 => EstimationMode::DelayedPlayback,
            _ => EstimationMode::Extrapolate,
        }
    }
}

/// Snapshot of the sync vars, taken once per tick.
#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    pub mode: EstimationMode,
    pub estimation_delay_ms: i64,
    pub smoothing_ms: i64,
    pub broadcast_interval_ms: i64,
}

pub struct ConfigContext {
    vars: Vec<Var>,
}

impl ConfigContext {
    pub fn new() -> Self {
        let mut ctx = Self { vars: Vec::new() };
        // Sync defaults. Mode 1 = extrapolate.
        ctx.register("net_estimation_mode", "1");
        ctx.register("net_estimation_delay", "100");
        ctx.register("net_smoothing", "100");
        ctx.register("net_broadcast_interval", "100");
        ctx.register("net_timeout", "10");
        ctx.register("net_max_send_failures", "20");
        ctx
    }

    /// Create the var with a default if missing; an existing var keeps its
    /// current value.
    pub fn register(&mut self, name: &str, default: &str) {
        if self.find(name).is_none() {
            self.vars.push(Var {
                name: name.to_string(),
                string: default.to_string(),
                value: default.parse().unwrap_or(0.0),
                modified: false,
            });
        }
    }

    pub fn find(&self, name: &str) -> Option<&Var> {
        self.vars.iter().find(|v| v.name == name)
    }

    pub fn set(&mut self, name: &str, value: &str) {
        match self.vars.iter_mut().find(|v| v.name == name) {
            Some(var) => {
                if var.string != value {
                    var.string = value.to_string();
                    var.value = value.parse().unwrap_or(0.0);
                    var.modified = true;
                }
            }
            None => self.register(name, value),
        }
    }

    pub fn set_value(&mut self, name: &str, value: f32) {
        self.set(name, &value.to_string());
    }

    pub fn value(&self, name: &str) -> f32 {
        self.find(name).map_or(0.0, |v| v.value)
    }

    pub fn string(&self, name: &str) -> &str {
        self.find(name).map_or("", |v| v.string.as_str())
    }

    /// Returns the names of vars changed since the last call and clears
    /// their modified flags.
    pub fn take_modified(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        for var in &mut self.vars {
            if var.modified {
                var.modified = false;
                out.push(var.name.clone());
            }
        }
        out
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            mode: EstimationMode::from_value(self.value("net_estimation_mode")),
            estimation_delay_ms: self.value("net_estimation_delay") as i64,
            smoothing_ms: self.value("net_smoothing") as i64,
            broadcast_interval_ms: self.value("net_broadcast_interval") as i64,
        }
    }
}

impl Default for ConfigContext {
    fn default() -> Self {
        Self::new()
    }
}
