//! Full-jitter delay randomization, used by the retry engine (§4.7).

use rand::Rng;
use std::time::Duration;

/// Apply full jitter: a uniform random duration in `[0, delay]`.
///
/// This is the only jitter strategy the retry engine uses; other
/// strategies previously supported here (equal, decorrelated) have no
/// caller in this crate and were dropped.
pub fn full_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    full_jitter_with_rng(delay, &mut rng)
}

/// Same as [`full_jitter`] but with an injectable RNG, for deterministic tests.
pub fn full_jitter_with_rng<R: Rng>(delay: Duration, rng: &mut R) -> Duration {
    let millis = delay.as_millis() as u64;
    if millis == 0 {
        return Duration::from_millis(0);
    }
    Duration::from_millis(rng.gen_range(0..=millis))
}
