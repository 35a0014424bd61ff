use crate::address;
use crate::cache::CacheLoc;

/// Magic ids reserved for the monitor/port remap side channel. Other magic
/// ids pass through to user-defined monitors.
pub const MAGIC_ID_REMAP_ASK: u64 = 0x2024_0913_00;
pub const MAGIC_ID_REMAP_END: u64 = 0x2024_1027_00;

/// Observer attached to a cache. Event hooks fire on the access path; the
/// magic function is an out-of-band channel keyed by reserved ids.
pub trait Monitor: Send + std::fmt::Debug {
    fn read(&mut self, cache_id: u64, addr: address, loc: CacheLoc, hit: bool);

    fn write(&mut self, cache_id: u64, addr: address, loc: CacheLoc, hit: bool);

    fn invalid(&mut self, cache_id: u64, addr: address, loc: CacheLoc);

    fn pause(&mut self);

    fn resume(&mut self);

    /// Returns true when the monitor recognized `magic_id`.
    fn magic_func(
        &mut self,
        cache_id: u64,
        addr: address,
        magic_id: u64,
        payload: Option<&mut bool>,
    ) -> bool;
}

/// The set of monitors attached to one cache.
#[derive(Debug, Default)]
pub struct MonitorGroup {
    monitors: Vec<Box<dyn Monitor>>,
}

impl MonitorGroup {
    pub fn attach(&mut self, monitor: Box<dyn Monitor>) {
        self.monitors.push(monitor);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    pub fn hook_read(&mut self, cache_id: u64, addr: address, loc: CacheLoc, hit: bool) {
        for monitor in &mut self.monitors {
            monitor.read(cache_id, addr, loc, hit);
        }
    }

    pub fn hook_write(&mut self, cache_id: u64, addr: address, loc: CacheLoc, hit: bool) {
        for monitor in &mut self.monitors {
            monitor.write(cache_id, addr, loc, hit);
        }
    }

    pub fn hook_invalid(&mut self, cache_id: u64, addr: address, loc: CacheLoc) {
        for monitor in &mut self.monitors {
            monitor.invalid(cache_id, addr, loc);
        }
    }

    pub fn pause(&mut self) {
        for monitor in &mut self.monitors {
            monitor.pause();
        }
    }

    pub fn resume(&mut self) {
        for monitor in &mut self.monitors {
            monitor.resume();
        }
    }

    pub fn magic_func(
        &mut self,
        cache_id: u64,
        addr: address,
        magic_id: u64,
        mut payload: Option<&mut bool>,
    ) -> bool {
        let mut handled = false;
        for monitor in &mut self.monitors {
            let payload = payload.as_mut().map(|flag| &mut **flag);
            handled |= monitor.magic_func(cache_id, addr, magic_id, payload);
        }
        handled
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AccessCounters {
    pub accesses: u64,
    pub misses: u64,
    pub writes: u64,
    pub write_misses: u64,
    pub invalids: u64,
}

impl AccessCounters {
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Plain counting monitor.
#[derive(Debug)]
pub struct AccessMonitor {
    pub counters: AccessCounters,
    active: bool,
}

impl Default for AccessMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            counters: AccessCounters::default(),
            active: true,
        }
    }
}

impl Monitor for AccessMonitor {
    fn read(&mut self, _cache_id: u64, _addr: address, _loc: CacheLoc, hit: bool) {
        if !self.active {
            return;
        }
        self.counters.accesses += 1;
        if !hit {
            self.counters.misses += 1;
        }
    }

    fn write(&mut self, _cache_id: u64, _addr: address, _loc: CacheLoc, hit: bool) {
        if !self.active {
            return;
        }
        self.counters.writes += 1;
        if !hit {
            self.counters.write_misses += 1;
        }
    }

    fn invalid(&mut self, _cache_id: u64, _addr: address, _loc: CacheLoc) {
        if !self.active {
            return;
        }
        self.counters.invalids += 1;
    }

    fn pause(&mut self) {
        self.active = false;
    }

    fn resume(&mut self) {
        self.active = true;
    }

    fn magic_func(
        &mut self,
        _cache_id: u64,
        _addr: address,
        _magic_id: u64,
        _payload: Option<&mut bool>,
    ) -> bool {
        false
    }
}

/// Shared state of the remap-requesting monitors. While the port drains a
/// pending remap the monitor deactivates itself so it cannot double-trigger.
#[derive(Debug)]
struct RemapperState {
    counters: AccessCounters,
    active: bool,
    remap: bool,
    remap_enable: bool,
}

impl RemapperState {
    fn new(remap_enable: bool) -> Self {
        Self {
            counters: AccessCounters::default(),
            active: true,
            remap: false,
            remap_enable,
        }
    }

    fn magic_func(&mut self, magic_id: u64, payload: Option<&mut bool>) -> bool {
        if magic_id == MAGIC_ID_REMAP_ASK {
            if self.remap_enable {
                if let Some(flag) = payload {
                    *flag |= self.remap;
                }
                if self.remap {
                    self.active = false;
                }
            }
            return true;
        }
        if magic_id == MAGIC_ID_REMAP_END {
            self.remap = false;
            self.active = true;
            self.counters.clear();
            return true;
        }
        false
    }
}

/// Requests a remap every `period` invalidations.
#[derive(Debug)]
pub struct SimpleEvRemapper {
    state: RemapperState,
    period: u64,
}

impl SimpleEvRemapper {
    #[must_use]
    pub fn new(period: u64) -> Self {
        assert!(period > 0, "remap period must be positive");
        Self {
            state: RemapperState::new(true),
            period,
        }
    }
}

impl Monitor for SimpleEvRemapper {
    fn read(&mut self, _cache_id: u64, _addr: address, _loc: CacheLoc, hit: bool) {
        if !self.state.active {
            return;
        }
        self.state.counters.accesses += 1;
        if !hit {
            self.state.counters.misses += 1;
        }
    }

    fn write(&mut self, _cache_id: u64, _addr: address, _loc: CacheLoc, hit: bool) {
        if !self.state.active {
            return;
        }
        self.state.counters.writes += 1;
        if !hit {
            self.state.counters.write_misses += 1;
        }
    }

    fn invalid(&mut self, _cache_id: u64, _addr: address, _loc: CacheLoc) {
        if !self.state.active {
            return;
        }
        self.state.counters.invalids += 1;
        if self.state.counters.invalids % self.period == 0 {
            self.state.remap = true;
        }
    }

    fn pause(&mut self) {
        self.state.active = false;
    }

    fn resume(&mut self) {
        self.state.active = true;
    }

    fn magic_func(
        &mut self,
        _cache_id: u64,
        _addr: address,
        magic_id: u64,
        payload: Option<&mut bool>,
    ) -> bool {
        self.state.magic_func(magic_id, payload)
    }
}

/// Z-score eviction-imbalance detector.
///
/// Per set it tracks an eviction count and a smoothed imbalance score; every
/// `access_period` reads the scores are refreshed and compared against the
/// threshold. A nonzero `evict_period` additionally forces a remap every
/// that many invalidations.
#[derive(Debug)]
pub struct ZsEvRemapper {
    state: RemapperState,
    factor: f64,
    threshold: f64,
    access_period: u64,
    evict_period: u64,
    evicts: Vec<u64>,
    history: Vec<f64>,
}

impl ZsEvRemapper {
    #[must_use]
    pub fn new(
        nset: usize,
        factor: f64,
        access_period: u64,
        evict_period: u64,
        threshold: f64,
        remap_enable: bool,
    ) -> Self {
        assert!(factor > 0.0 && factor < 1.0, "factor must lie in (0, 1)");
        Self {
            state: RemapperState::new(remap_enable),
            factor,
            threshold,
            access_period,
            evict_period,
            evicts: vec![0; nset],
            history: vec![0.0; nset],
        }
    }

    fn z_score_detect(&mut self) -> bool {
        let nset = self.evicts.len() as f64;
        let qrm = (self
            .evicts
            .iter()
            .map(|&e| (e as f64) * (e as f64))
            .sum::<f64>()
            / (nset - 1.0))
            .sqrt();
        let mu = self.evicts.iter().sum::<u64>() as f64 / nset;
        for (h, &evicts) in self.history.iter_mut().zip(&self.evicts) {
            let evicts = evicts as f64;
            let delta = if qrm == 0.0 {
                0.0
            } else {
                (evicts - mu) * evicts / qrm
            };
            let signed = if evicts > mu { delta } else { -delta };
            *h = (1.0 - self.factor) * *h + self.factor * signed;
        }
        self.history.iter().any(|&h| h >= self.threshold)
    }
}

impl Monitor for ZsEvRemapper {
    fn read(&mut self, _cache_id: u64, _addr: address, _loc: CacheLoc, hit: bool) {
        if !self.state.active {
            return;
        }
        self.state.counters.accesses += 1;
        if !hit {
            self.state.counters.misses += 1;
        }
        if self.access_period != 0 && self.state.counters.accesses % self.access_period == 0 {
            if self.z_score_detect() {
                self.state.remap = true;
            }
            self.evicts.fill(0);
        }
    }

    fn write(&mut self, _cache_id: u64, _addr: address, _loc: CacheLoc, hit: bool) {
        if !self.state.active {
            return;
        }
        self.state.counters.writes += 1;
        if !hit {
            self.state.counters.write_misses += 1;
        }
    }

    fn invalid(&mut self, _cache_id: u64, _addr: address, loc: CacheLoc) {
        if !self.state.active {
            return;
        }
        self.state.counters.invalids += 1;
        self.evicts[loc.set] += 1;
        if self.evict_period != 0 && self.state.counters.invalids % self.evict_period == 0 {
            self.state.remap = true;
        }
    }

    fn pause(&mut self) {
        self.state.active = false;
    }

    fn resume(&mut self) {
        self.state.active = true;
    }

    fn magic_func(
        &mut self,
        _cache_id: u64,
        _addr: address,
        magic_id: u64,
        payload: Option<&mut bool>,
    ) -> bool {
        if magic_id == MAGIC_ID_REMAP_END {
            self.evicts.fill(0);
            self.history.fill(0.0);
        }
        self.state.magic_func(magic_id, payload)
    }
}
