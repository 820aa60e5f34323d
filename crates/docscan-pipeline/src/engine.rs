//! Process-wide processing engine.
//!
//! The engine holds lookup tables shared by every pipeline run. It is
//! built on first use and lives for the rest of the process; there is
//! no teardown. Every request entry point calls [`ensure_ready`] before
//! touching pixels, so initialization cost lands on the first request
//! only and concurrent first calls block until the single build finishes.

use std::sync::OnceLock;

use tracing::debug;

/// Fixed-point shift for the luma weights (14 fractional bits).
const LUMA_SHIFT: u32 = 14;

/// Rec. 601 weights scaled by `1 << LUMA_SHIFT`: 0.299, 0.587, 0.114.
const LUMA_WEIGHTS: [u32; 3] = [4899, 9617, 1868];

const _: () = assert!(LUMA_WEIGHTS[0] + LUMA_WEIGHTS[1] + LUMA_WEIGHTS[2] == 1 << LUMA_SHIFT);

/// Precomputed tables used by the color conversion stages.
#[derive(Debug)]
pub struct Engine {
    red: [u32; 256],
    green: [u32; 256],
    blue: [u32; 256],
}

impl Engine {
    #[allow(clippy::cast_possible_truncation)]
    fn build() -> Self {
        let table = |weight: u32| -> [u32; 256] { std::array::from_fn(|v| weight * v as u32) };
        Self {
            red: table(LUMA_WEIGHTS[0]),
            green: table(LUMA_WEIGHTS[1]),
            blue: table(LUMA_WEIGHTS[2]),
        }
    }

    /// Weighted luma of one RGB triple, rounded to nearest.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn luma(&self, r: u8, g: u8, b: u8) -> u8 {
        let sum = self.red[usize::from(r)] + self.green[usize::from(g)] + self.blue[usize::from(b)];
        // Weights sum to exactly 1 << LUMA_SHIFT, so the result fits in u8.
        ((sum + (1 << (LUMA_SHIFT - 1))) >> LUMA_SHIFT) as u8
    }
}

static ENGINE: OnceLock<Engine> = OnceLock::new();

/// The shared engine, building it on first access.
#[must_use]
pub fn engine() -> &'static Engine {
    ENGINE.get_or_init(|| {
        debug!("initializing processing engine");
        Engine::build()
    })
}

/// Make sure the engine is initialized. Idempotent.
pub fn ensure_ready() {
    let _ = engine();
}

/// Whether the engine has been initialized in this process.
#[must_use]
pub fn is_ready() -> bool {
    ENGINE.get().is_some()
}
