/// Latency contribution contract. The cache invokes the model at access,
/// replacement and writeback points; the port accumulates the returned
/// cycles and forwards them outward.
pub trait DelayModel: Send + std::fmt::Debug {
    fn access(&mut self, write: bool) -> u64;

    fn replace(&mut self) -> u64;

    fn writeback(&mut self) -> u64;
}

/// Untimed simulation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDelay;

impl DelayModel for NoDelay {
    fn access(&mut self, _write: bool) -> u64 {
        0
    }

    fn replace(&mut self) -> u64 {
        0
    }

    fn writeback(&mut self) -> u64 {
        0
    }
}

/// Constant per-event latencies.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay {
    pub access: u64,
    pub replace: u64,
    pub writeback: u64,
}

impl DelayModel for FixedDelay {
    fn access(&mut self, _write: bool) -> u64 {
        self.access
    }

    fn replace(&mut self) -> u64 {
        self.replace
    }

    fn writeback(&mut self) -> u64 {
        self.writeback
    }
}

#[cfg(test)]
mod tests {
    use super::{DelayModel, FixedDelay, NoDelay};

    #[test]
    fn no_delay_is_free() {
        let mut delay = NoDelay;
        assert_eq!(delay.access(true) + delay.replace() + delay.writeback(), 0);
    }

    #[test]
    fn fixed_delay_charges_each_event() {
        let mut delay = FixedDelay {
            access: 2,
            replace: 10,
            writeback: 30,
        };
        assert_eq!(delay.access(false), 2);
        assert_eq!(delay.replace(), 10);
        assert_eq!(delay.writeback(), 30);
    }
}
