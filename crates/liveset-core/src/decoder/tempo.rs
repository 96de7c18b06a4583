//! Tempo map: beat position to wall-clock seconds.
//!
//! Breakpoints are `(beat, bpm)` pairs with linear interpolation between
//! them. Time is the integral of `60 / bpm(x)` over beats, evaluated in
//! closed form per segment so ramps are exact.

/// A piecewise-linear tempo curve. Always holds at least one breakpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct TempoMap {
    points: Vec<(f64, f64)>,
}

impl TempoMap {
    pub fn constant(bpm: f64) -> Self {
        Self {
            points: vec![(0.0, bpm)],
        }
    }

    /// Builds a map from automation breakpoints. Non-positive or non-finite
    /// tempos are dropped; returns `None` when nothing usable remains.
    pub fn from_points(points: impl IntoIterator<Item = (f64, f64)>) -> Option<Self> {
        let mut points: Vec<(f64, f64)> = points
            .into_iter()
            .filter(|(beat, bpm)| beat.is_finite() && bpm.is_finite() && *bpm > 0.0)
            .collect();
        if points.is_empty() {
            return None;
        }
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        Some(Self { points })
    }

    /// Tempo in effect at `beat`.
    pub fn bpm_at(&self, beat: f64) -> f64 {
        let first = self.points[0];
        if beat <= first.0 {
            return first.1;
        }
        for w in self.points.windows(2) {
            let (b0, t0) = w[0];
            let (b1, t1) = w[1];
            if beat <= b1 {
                if b1 == b0 {
                    return t1;
                }
                return t0 + (t1 - t0) * (beat - b0) / (b1 - b0);
            }
        }
        self.points[self.points.len() - 1].1
    }

    /// Seconds elapsed from beat 0 to `beat`. Negative beats yield negative
    /// seconds at the initial tempo.
    pub fn seconds_at(&self, beat: f64) -> f64 {
        if beat < 0.0 {
            return -60.0 * (-beat) / self.bpm_at(0.0);
        }
        let mut total = 0.0;
        let mut cursor = 0.0;
        let mut cursor_bpm = self.bpm_at(0.0);
        for &(pb, pt) in &self.points {
            if pb <= cursor {
                if pb == cursor {
                    // Step change at the cursor.
                    cursor_bpm = pt;
                }
                continue;
            }
            let end = pb.min(beat);
            let end_bpm = if end < pb { self.bpm_at(end) } else { pt };
            total += segment_seconds(end - cursor, cursor_bpm, end_bpm);
            cursor = end;
            cursor_bpm = end_bpm;
            if cursor >= beat {
                return total;
            }
        }
        total + segment_seconds(beat - cursor, cursor_bpm, cursor_bpm)
    }
}

/// Seconds spanned by `len` beats while tempo moves linearly `b0 -> b1`.
fn segment_seconds(len: f64, b0: f64, b1: f64) -> f64 {
    if len <= 0.0 {
        return 0.0;
    }
    if (b1 - b0).abs() < 1e-9 {
        return 60.0 * len / b0;
    }
    60.0 * len / (b1 - b0) * (b1 / b0).ln()
}
