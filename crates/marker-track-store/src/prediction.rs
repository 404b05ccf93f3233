use nalgebra::Point2;

/// Predict a 2D position at `frame` from the nearest defined history.
///
/// Forward tracking looks at earlier frames, backward tracking at later ones.
/// Two consecutive defined samples give a linear extrapolation; a single one
/// is repeated. `defined(f)` returns the point at `f` if it is usable.
pub fn predict_position(
    defined: impl Fn(usize) -> Option<Point2<f64>>,
    frames: usize,
    frame: usize,
    forward: bool,
) -> Option<Point2<f64>> {
    if forward {
        let last = (0..frame.min(frames)).rev().find(|&f| defined(f).is_some())?;
        let p = defined(last)?;
        let prev = last.checked_sub(1).and_then(&defined);
        Some(match prev {
            Some(q) => p + (p - q) * (frame - last) as f64,
            None => p,
        })
    } else {
        let next = (frame + 1..frames).find(|&f| defined(f).is_some())?;
        let p = defined(next)?;
        let after = (next + 1 < frames).then(|| defined(next + 1)).flatten();
        Some(match after {
            Some(q) => p + (p - q) * (next - frame) as f64,
            None => p,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(points: &[Option<(f64, f64)>]) -> impl Fn(usize) -> Option<Point2<f64>> + '_ {
        move |f| points.get(f).copied().flatten().map(|(x, y)| Point2::new(x, y))
    }

    #[test]
    fn forward_extrapolates_constant_velocity() {
        let pts = [Some((10.0, 20.0)), Some((12.0, 19.0)), None, None];
        let p = predict_position(lookup(&pts), pts.len(), 2, true).unwrap();
        assert_eq!(p, Point2::new(14.0, 18.0));
        let p = predict_position(lookup(&pts), pts.len(), 3, true).unwrap();
        assert_eq!(p, Point2::new(16.0, 17.0));
    }

    #[test]
    fn isolated_sample_is_repeated() {
        let pts = [None, Some((5.0, 5.0)), None, None];
        assert_eq!(
            predict_position(lookup(&pts), pts.len(), 3, true),
            Some(Point2::new(5.0, 5.0))
        );
        assert_eq!(
            predict_position(lookup(&pts), pts.len(), 0, false),
            Some(Point2::new(5.0, 5.0))
        );
    }

    #[test]
    fn backward_uses_later_frames() {
        let pts = [None, None, Some((8.0, 0.0)), Some((9.0, 1.0))];
        assert_eq!(
            predict_position(lookup(&pts), pts.len(), 1, false),
            Some(Point2::new(7.0, -1.0))
        );
        assert_eq!(
            predict_position(lookup(&pts), pts.len(), 0, false),
            Some(Point2::new(6.0, -2.0))
        );
    }

    #[test]
    fn no_history_gives_none() {
        let pts = [None, None, Some((1.0, 1.0))];
        assert_eq!(predict_position(lookup(&pts), pts.len(), 1, true), None);
        assert_eq!(predict_position(lookup(&pts), pts.len(), 2, false), None);
    }
}
