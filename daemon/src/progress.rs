//! Decaying progress simulation for the prewarm phase.
//!
//! Model specialization exposes no incremental progress, only a terminal
//! callback. To keep the progress bar moving, displayed progress follows an
//! exponential decay toward a target fraction: with target `T` and maximum
//! expected duration `D`, the decay constant is `k = -ln(1-T)/D` and the
//! value at time `t` is `p0 + (1-p0)(1 - e^(-k*t))`, capped at `T`.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Interval between displayed-progress updates.
pub const TICK: Duration = Duration::from_millis(100);

/// Displayed progress value at `elapsed` seconds, capped at `target`.
fn decayed_value(initial: f32, target: f32, decay: f32, elapsed: f32) -> f32 {
    let increment = (1.0 - initial) * (1.0 - (-decay * elapsed).exp());
    (initial + increment).min(target)
}

/// Drive `sink` with a monotonically increasing fraction converging to
/// `target`, until the target is reached or `cancel` fires.
///
/// Values are strictly increasing and never exceed `target`. Cancel this
/// task the moment the real operation completes.
pub async fn simulate(
    initial: f32,
    target: f32,
    max_time: Duration,
    cancel: CancellationToken,
    mut sink: impl FnMut(f32),
) {
    if target <= initial {
        return;
    }

    let decay = -(1.0 - target).ln() / max_time.as_secs_f32();
    let start = Instant::now();
    let mut last = initial;

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                trace!(progress = last, "Progress simulation cancelled");
                return;
            }
            () = tokio::time::sleep(TICK) => {}
        }

        let elapsed = start.elapsed().as_secs_f32();
        let value = decayed_value(initial, target, decay, elapsed);
        if value > last {
            sink(value);
            last = value;
        }
        if value >= target {
            return;
        }
    }
}

#[cfg(test)]
#[path = "progress_test.rs"]
mod tests;
