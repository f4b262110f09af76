//! Central tunables, gathered into one `const fn`-built struct rather than
//! scattered bare `pub const`s, so a single place answers "what are this
//! kernel's compile-time knobs". There is no filesystem up before the VFS
//! itself is initialized, so these are `const` rather than read from a
//! config file at boot.

/// Tick rate, pipe ring geometry and message-queue limits.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Nominal PIT tick rate in Hz; the PIT divisor in `arch::x86_64::pit`
    /// must be programmed to match.
    pub tick_hz: u64,
    /// Number of fixed-size buffers in a pipe's ring.
    pub pipe_num_buffers: usize,
    /// Byte capacity of each pipe ring buffer.
    pub pipe_buffer_size: usize,
    /// Upper bound on a single message-queue payload, exclusive.
    pub msgmax: usize,
    /// Default per-queue byte budget for message queues.
    pub msgmnb: u64,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            tick_hz: 100,
            pipe_num_buffers: 5,
            pipe_buffer_size: 64,
            msgmax: 8192,
            msgmnb: 16384,
        }
    }

    /// The defaults every subsystem's tunable constants derive from.
    pub const DEFAULT: Config = Config::new();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::new();
        assert_eq!(cfg.tick_hz, 100);
        assert_eq!(cfg.pipe_num_buffers, 5);
        assert_eq!(cfg.pipe_buffer_size, 64);
        assert_eq!(cfg.msgmax, 8192);
        assert_eq!(cfg.msgmnb, 16384);
    }
}
