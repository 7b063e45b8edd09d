//! Load sampler contract. Live process/resource sampling is explicitly out
//! of scope (§1 Non-goals) — the daemon only depends on this trait's
//! shape, so a real implementation (`psutil`-equivalent) can be swapped in
//! without touching the `loadbal` handler.

pub struct LoadSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
}

pub trait LoadSampler: Send + Sync {
    fn sample(&self) -> LoadSample;
}

/// Stand-in used when no real sampler is wired up: always reports zeros
/// rather than fabricating plausible-looking numbers.
pub struct NullSampler;

impl LoadSampler for NullSampler {
    fn sample(&self) -> LoadSample {
        LoadSample { cpu_percent: 0.0, memory_percent: 0.0, disk_percent: 0.0 }
    }
}
