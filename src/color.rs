//! Flow/alpha normalization for overlapping stamps.
//!
//! A stroke is built from many overlapping semi-transparent stamps.  The
//! user-facing *flow* describes the opacity reached once a pixel has been
//! covered by all of them, so the per-stamp alpha has to be derived from the
//! flow and the number of stamps that will overlap a pixel.
//!
//! Everything here is a pure function of its arguments.

/// Largest acceptable error of [`alpha_for_n_blends`].
pub const FLOW_TOLERANCE: f64 = 0.0005;

/// Upper bound on bisection steps.  64 halvings exhaust f64 precision.
const MAX_BISECTION_STEPS: usize = 64;

/// Result of blending `alpha` over itself `n` times with "over" compositing.
///
/// Whole counts are resolved from the binary digits of `n`: `r_{2k}` comes
/// from doubling (`r + r(1 - r)`) and set bits are folded in with
/// `r_{m+k} = r_m + r_k(1 - r_m)`.  A fractional tail is interpolated
/// linearly towards the next whole blend.
pub fn n_blends(alpha: f64, n: f64) -> f64 {
    if alpha >= 1.0 {
        return 1.0;
    }
    if n < 1.0 {
        return alpha * n.max(0.0);
    }
    let whole = n.floor();
    let mut count = whole as u64;
    let mut power = alpha;
    let mut result = 0.0;
    while count > 0 {
        if count & 1 == 1 {
            result += power * (1.0 - result);
        }
        power += power * (1.0 - power);
        count >>= 1;
    }
    let tail = n - whole;
    if tail > 0.0 {
        result += alpha * (1.0 - result) * tail;
    }
    result
}

/// Closed-form estimate of the per-sample alpha for `n` blends.
///
/// Solving `flow'(n) = (1 - flow(n)) * a` with `a = -ln(1 - alpha)` gives
/// `flow(n) = 1 - (1 - alpha)^n`, which inverts to the expression below.
/// It is exact for whole blend counts and slightly low for fractional ones,
/// where the linear tail of [`n_blends`] adds more than the exponential.
pub fn approximate_alpha_for_n_blends(flow: f64, n: f64) -> f64 {
    if flow >= 1.0 {
        return 1.0;
    }
    if n < 1.0 {
        return (flow / n).min(1.0);
    }
    let flow = flow.max(0.0);
    let estimate = 1.0 - (1.0 - flow).powf(1.0 / n);
    // Correct for the linear tail: the fractional part behaves as slightly
    // fewer than `n` exponential steps.
    let tail = n.fract();
    if tail > 0.0 {
        let corrected_n = n.floor() + tail * (1.0 - estimate * 0.5);
        (1.0 - (1.0 - flow).powf(1.0 / corrected_n)).clamp(0.0, 1.0)
    } else {
        estimate
    }
}

/// Per-sample alpha so that `n` blends of it reach `flow`.
///
/// * `flow >= 1` returns exactly `1.0`.
/// * `n < 1` returns `min(flow / n, 1)`: fewer than one sample must carry
///   more than the whole flow on its own.
/// * Otherwise the analytic estimate is refined by bisection until
///   `|n_blends(alpha, n) - flow| < FLOW_TOLERANCE`.
pub fn alpha_for_n_blends(flow: f64, n: f64) -> f64 {
    if flow >= 1.0 {
        return 1.0;
    }
    if n < 1.0 {
        return (flow / n).min(1.0);
    }
    if flow <= 0.0 {
        return 0.0;
    }

    let guess = approximate_alpha_for_n_blends(flow, n);
    if (n_blends(guess, n) - flow).abs() < FLOW_TOLERANCE {
        return guess;
    }

    let mut low = 0.0;
    let mut high = 1.0;
    let mut alpha = guess;
    for _ in 0..MAX_BISECTION_STEPS {
        alpha = (low + high) * 0.5;
        let reached = n_blends(alpha, n);
        if (reached - flow).abs() < FLOW_TOLERANCE {
            break;
        }
        if reached < flow {
            low = alpha;
        } else {
            high = alpha;
        }
    }
    alpha
}

/// 0–255 channel to 0.0–1.0.
#[inline]
pub fn unit(channel: u8) -> f32 {
    channel as f32 / 255.0
}

/// 0.0–1.0 to a rounded 0–255 channel.
#[inline]
pub fn channel(unit: f32) -> u8 {
    (unit * 255.0).round().clamp(0.0, 255.0) as u8
}
