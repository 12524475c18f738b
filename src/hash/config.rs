// String-matcher tuning profiles and encoder-wide defaults.
//
// The precompiled profiles trade search effort for speed. `Custom` takes
// any validated parameter set for tuning experiments; every profile is
// consumed by the same matcher implementation.

use crate::error::{Error, Result};

/// Minimum COPY length.
pub const MIN_MATCH: usize = 4;

/// Minimum run worth encoding as RUN.
pub const MIN_RUN: usize = 8;

/// Cap on the piece of an overlapping match kept when splitting.
pub const MAX_MATCH_SPLIT: usize = 18;

/// Default input window size (8 MiB).
pub const DEFAULT_WINSIZE: usize = 1 << 23;

/// Default self-match chain array size.
pub const DEFAULT_SPREVSZ: usize = 1 << 18;

/// Default source window budget (64 MiB).
pub const DEFAULT_SRCWINSZ: u64 = 1 << 26;

/// Default optimizer queue capacity.
pub const DEFAULT_IOPT_SIZE: usize = 1 << 15;

/// Window sizes are clamped to this range.
pub const MIN_WINSIZE: usize = 1 << 14;
pub const MAX_WINSIZE: usize = 1 << 24;

/// String-matcher parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatcherConfig {
    /// Source checksum window.
    pub large_look: usize,
    /// Distance between indexed source positions.
    pub large_step: usize,
    /// Self-match checksum window.
    pub small_look: usize,
    /// Chain depth while no match is held.
    pub small_chain: usize,
    /// Chain depth while a lazy match is held.
    pub small_lchain: usize,
    /// Matches shorter than this are held for one step of lookahead.
    pub max_lazy: usize,
    /// A self-match this long ends the chain walk.
    pub long_enough: usize,
}

impl MatcherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.small_look != MIN_MATCH {
            return Err(Error::invalid("small_look must be 4"));
        }
        if self.large_look < MIN_MATCH || self.large_look > 1 << 12 {
            return Err(Error::invalid(format!(
                "large_look {} out of range",
                self.large_look
            )));
        }
        if self.large_step == 0 || self.small_chain == 0 || self.small_lchain == 0 {
            return Err(Error::invalid("step and chain lengths must be positive"));
        }
        Ok(())
    }
}

/// Named matcher profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatcherProfile {
    Fastest,
    Faster,
    Fast,
    #[default]
    Default,
    Slow,
    Custom(MatcherConfig),
}

impl MatcherProfile {
    /// Profile for a compression level 0..=9.
    pub fn for_level(level: u32) -> Self {
        match level {
            0 | 1 => Self::Fastest,
            2 => Self::Faster,
            3..=5 => Self::Fast,
            6 => Self::Default,
            _ => Self::Slow,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Fastest => "fastest",
            Self::Faster => "faster",
            Self::Fast => "fast",
            Self::Default => "default",
            Self::Slow => "slow",
            Self::Custom(_) => "custom",
        }
    }

    pub fn config(&self) -> MatcherConfig {
        let p = |large_step, small_chain, small_lchain, max_lazy, long_enough| MatcherConfig {
            large_look: 9,
            large_step,
            small_look: MIN_MATCH,
            small_chain,
            small_lchain,
            max_lazy,
            long_enough,
        };
        match *self {
            Self::Fastest => p(26, 1, 1, 6, 6),
            Self::Faster => p(15, 1, 1, 18, 18),
            Self::Fast => p(8, 4, 1, 18, 35),
            Self::Default => p(3, 8, 2, 36, 70),
            Self::Slow => p(2, 44, 13, 90, 70),
            Self::Custom(cfg) => cfg,
        }
    }
}
