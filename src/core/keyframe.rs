use serde::{Deserialize, Serialize};

use crate::{
    core::Fraction,
    error::{KeyframeError, Result},
};

/// Upper bound on Bezier bisection steps; the step halves each round, so
/// anything past ~50 is below f64 resolution.
const MAX_BEZIER_ITERATIONS: usize = 64;

/// An X/Y pair; X is a frame number, Y the value at that frame
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
}

impl Coordinate {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// How the curve reaches a point from its predecessor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InterpolationType {
    #[default]
    Bezier,
    Linear,
    Constant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HandleType {
    #[default]
    Auto,
    Manual,
}

/// A keyframe point with Bezier handles.
///
/// Handles are relative: X is a fraction of the horizontal distance to the
/// neighbouring point, Y a fraction of the vertical distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub co: Coordinate,
    pub handle_left: Coordinate,
    pub handle_right: Coordinate,
    pub interpolation: InterpolationType,
    pub handle_type: HandleType,
}

impl Default for Point {
    fn default() -> Self {
        Self::new(1.0, 0.0)
    }
}

impl Point {
    /// Bezier point at (x, y)
    pub fn new(x: f64, y: f64) -> Self {
        Self::with_interpolation(x, y, InterpolationType::Bezier)
    }

    /// Constant point at frame 1
    pub fn from_value(y: f64) -> Self {
        Self::with_interpolation(1.0, y, InterpolationType::Constant)
    }

    pub fn with_interpolation(x: f64, y: f64, interpolation: InterpolationType) -> Self {
        Self {
            co: Coordinate::new(x, y),
            handle_left: Coordinate::new(0.5, 1.0),
            handle_right: Coordinate::new(0.5, 0.0),
            interpolation,
            handle_type: HandleType::Auto,
        }
    }
}

/// A value curve over frame numbers
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Keyframe {
    points: Vec<Point>,
}

impl Keyframe {
    /// A curve holding `value` from frame 1 on
    pub fn new(value: f64) -> Self {
        Self { points: vec![Point::from_value(value)] }
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Add a Bezier point
    pub fn add_point(&mut self, x: f64, y: f64) {
        self.insert(Point::new(x, y));
    }

    pub fn add_point_with(&mut self, x: f64, y: f64, interpolation: InterpolationType) {
        self.insert(Point::with_interpolation(x, y, interpolation));
    }

    /// Insert keeping points sorted by X; a point at an existing X replaces it
    pub fn insert(&mut self, point: Point) {
        let idx = self.points.partition_point(|p| p.co.x < point.co.x);
        match self.points.get_mut(idx) {
            Some(existing) if existing.co.x == point.co.x => *existing = point,
            _ => self.points.insert(idx, point),
        }
    }

    /// Value of the curve at a frame
    pub fn get_value(&self, frame: i64) -> f64 {
        let (first, last) = match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return 0.0,
        };

        let index = frame as f64;
        let idx = self.points.partition_point(|p| p.co.x < index);
        if idx == self.points.len() {
            return last.co.y;
        }
        if idx == 0 {
            return first.co.y;
        }

        let candidate = &self.points[idx];
        if candidate.co.x == index {
            return candidate.co.y;
        }
        let previous = &self.points[idx - 1];

        match candidate.interpolation {
            InterpolationType::Constant => previous.co.y,
            InterpolationType::Linear => {
                let slope = (candidate.co.y - previous.co.y) / (candidate.co.x - previous.co.x);
                previous.co.y + slope * (index - previous.co.x)
            }
            InterpolationType::Bezier => bezier_value(previous, candidate, index),
        }
    }

    /// Rounded value as i32
    pub fn get_int(&self, frame: i64) -> i32 {
        self.get_value(frame).round() as i32
    }

    /// Rounded value as i64
    pub fn get_long(&self, frame: i64) -> i64 {
        self.get_value(frame).round() as i64
    }

    /// Number of frames the curve spans
    pub fn get_length(&self) -> i64 {
        match self.points.len() {
            0 => 0,
            1 => 1,
            _ => self.points.last().map(|p| p.co.x.round() as i64 + 1).unwrap_or(0),
        }
    }

    pub fn get_count(&self) -> usize {
        self.points.len()
    }

    pub fn get_point(&self, index: i64) -> Result<Point> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.points.get(i))
            .copied()
            .ok_or_else(|| self.out_of_bounds(index))
    }

    /// True if a point sits at the same X
    pub fn contains(&self, point: &Point) -> bool {
        self.points.iter().any(|p| p.co.x == point.co.x)
    }

    /// Index of the point with the same coordinate
    pub fn find_index(&self, point: &Point) -> Result<usize> {
        self.points
            .iter()
            .position(|p| p.co == point.co)
            .ok_or_else(|| self.out_of_bounds(-1))
    }

    /// Nearest point at or after `point` (or strictly before it with
    /// `use_left`). Falls back to the first point for X <= 1 and the last
    /// point otherwise; `(-1, -1)` when the curve is empty.
    pub fn get_closest_point(&self, point: &Point, use_left: bool) -> Point {
        let found = if use_left {
            self.points.iter().take_while(|p| p.co.x < point.co.x).last()
        } else {
            self.points.iter().find(|p| p.co.x >= point.co.x)
        };

        match found {
            Some(p) => *p,
            None if point.co.x <= 1.0 => self.points.first().copied().unwrap_or_else(|| Point::new(-1.0, -1.0)),
            None => self.points.last().copied().unwrap_or_else(|| Point::new(-1.0, -1.0)),
        }
    }

    /// The point before `point`; the first point for the first, `(-1, -1)` if absent
    pub fn get_previous_point(&self, point: &Point) -> Point {
        match self.find_index(point) {
            Ok(0) => self.points[0],
            Ok(i) => self.points[i - 1],
            Err(_) => Point::new(-1.0, -1.0),
        }
    }

    /// Point with the largest Y (the later one on ties)
    pub fn get_max_point(&self) -> Point {
        let mut max = Point::new(-1.0, -1.0);
        for p in &self.points {
            if p.co.y >= max.co.y {
                max = *p;
            }
        }
        max
    }

    /// Change in rounded value from the previous frame
    pub fn get_delta(&self, frame: i64) -> f64 {
        if frame < 1 {
            return 0.0;
        }
        if frame == 1 {
            return self.points.first().map(|p| p.co.y).unwrap_or(0.0);
        }
        if frame >= self.get_length() {
            return 0.0;
        }
        (self.get_long(frame) - self.get_long(frame - 1)) as f64
    }

    /// Whether the next differing rounded value is larger than this one
    pub fn is_increasing(&self, frame: i64) -> bool {
        let length = self.get_length();
        if frame < 1 || frame + 1 >= length {
            return true;
        }

        let current = self.get_long(frame);
        for next in (frame + 1)..=length {
            let value = self.get_long(next);
            if value > current {
                return true;
            }
            if value < current {
                return false;
            }
        }
        false
    }

    /// Position of `frame` within its run of equal rounded values, as
    /// (repeats up to and including it) / (run length)
    pub fn get_repeat_fraction(&self, frame: i64) -> Fraction {
        let length = self.get_length();
        if frame < 1 || frame + 1 >= length {
            return Fraction::new(1, 1);
        }

        let current = self.get_long(frame);
        let previous = (1..=frame).rev().take_while(|&i| self.get_long(i) == current).count();
        let next = ((frame + 1)..length).take_while(|&i| self.get_long(i) == current).count();

        Fraction::new(previous as i32, (previous + next) as i32)
    }

    /// Remove the point with the same coordinate
    pub fn remove_point(&mut self, point: &Point) -> Result<()> {
        let index = self.find_index(point)?;
        self.points.remove(index);
        Ok(())
    }

    pub fn remove_point_at(&mut self, index: i64) -> Result<()> {
        match usize::try_from(index) {
            Ok(i) if i < self.points.len() => {
                self.points.remove(i);
                Ok(())
            }
            _ => Err(self.out_of_bounds(index)),
        }
    }

    /// Replace the point at `index` with `point`, keeping the order
    pub fn update_point(&mut self, index: i64, point: Point) -> Result<()> {
        self.remove_point_at(index)?;
        self.insert(point);
        Ok(())
    }

    /// Stretch the curve in time; the first point keeps its position
    pub fn scale_points(&mut self, scale: f64) {
        for p in self.points.iter_mut().skip(1) {
            p.co.x = (p.co.x * scale).round();
        }
    }

    /// Mirror the values while keeping the X positions
    pub fn flip_points(&mut self) {
        let n = self.points.len();
        for i in 0..n / 2 {
            let j = n - 1 - i;
            let (yi, yj) = (self.points[i].co.y, self.points[j].co.y);
            self.points[i].co.y = yj;
            self.points[j].co.y = yi;
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let parsed: Keyframe = serde_json::from_str(json)
            .map_err(|e| KeyframeError::InvalidJson { reason: e.to_string() })?;

        // Re-insert so unsorted or duplicated input still obeys the ordering rule
        let mut keyframe = Keyframe::default();
        for p in parsed.points {
            keyframe.insert(p);
        }
        Ok(keyframe)
    }

    fn out_of_bounds(&self, index: i64) -> crate::error::ReelError {
        KeyframeError::OutOfBoundsPoint { index, count: self.points.len() }.into()
    }
}

impl From<f64> for Keyframe {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

/// Solve the cubic between two points for X by bisection on t
fn bezier_value(previous: &Point, candidate: &Point, index: f64) -> f64 {
    let dx = candidate.co.x - previous.co.x;
    let dy = candidate.co.y - previous.co.y;
    let p0 = previous.co;
    let p1 = Coordinate::new(p0.x + previous.handle_right.x * dx, p0.y + previous.handle_right.y * dy);
    let p2 = Coordinate::new(p0.x + candidate.handle_left.x * dx, p0.y + candidate.handle_left.y * dy);
    let p3 = candidate.co;

    let mut t = 0.5;
    let mut step = 0.25;
    let mut y = 0.0;
    for _ in 0..MAX_BEZIER_ITERATIONS {
        let mt = 1.0 - t;
        let b = [mt * mt * mt, 3.0 * t * mt * mt, 3.0 * t * t * mt, t * t * t];
        let x = p0.x * b[0] + p1.x * b[1] + p2.x * b[2] + p3.x * b[3];
        y = p0.y * b[0] + p1.y * b[1] + p2.y * b[2] + p3.y * b[3];

        if (index - x).abs() < 0.01 {
            break;
        }
        if x > index {
            t -= step;
        } else {
            t += step;
        }
        step /= 2.0;
    }
    y
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_single() {
        let empty = Keyframe::default();
        assert_eq!(empty.get_value(10), 0.0);
        assert_eq!(empty.get_length(), 0);

        let single = Keyframe::new(2.5);
        assert_eq!(single.get_value(-5), 2.5);
        assert_eq!(single.get_value(1000), 2.5);
        assert_eq!(single.get_length(), 1);
    }

    #[test]
    fn test_points_stay_sorted_and_replace() {
        let mut kf = Keyframe::default();
        kf.add_point(10.0, 1.0);
        kf.add_point(1.0, 0.0);
        kf.add_point(5.0, 3.0);
        kf.add_point(5.0, 7.0);

        let xs: Vec<f64> = kf.points().iter().map(|p| p.co.x).collect();
        assert_eq!(xs, vec![1.0, 5.0, 10.0]);
        assert_eq!(kf.get_point(1).unwrap().co.y, 7.0);
        assert_eq!(kf.get_length(), 11);
    }

    #[test]
    fn test_linear_and_constant() {
        let mut kf = Keyframe::default();
        kf.add_point_with(1.0, 0.0, InterpolationType::Linear);
        kf.add_point_with(11.0, 10.0, InterpolationType::Linear);
        assert!((kf.get_value(6) - 5.0).abs() < 1e-9);
        assert_eq!(kf.get_value(11), 10.0);
        assert_eq!(kf.get_value(50), 10.0);

        let mut kf = Keyframe::default();
        kf.add_point_with(1.0, 2.0, InterpolationType::Constant);
        kf.add_point_with(10.0, 8.0, InterpolationType::Constant);
        assert_eq!(kf.get_value(9), 2.0);
        assert_eq!(kf.get_value(10), 8.0);
    }

    #[test]
    fn test_bezier_is_monotonic_between_points() {
        let mut kf = Keyframe::default();
        kf.add_point(1.0, 1.0);
        kf.add_point(24.0, -1.0);

        let values: Vec<f64> = (1..=24).map(|f| kf.get_value(f)).collect();
        assert_eq!(values[0], 1.0);
        assert_eq!(values[23], -1.0);
        for pair in values.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-9);
        }
        // Default handles give a symmetric ease, so the midpoint is near zero
        assert!(kf.get_value(12).abs() < 0.15);
    }

    #[test]
    fn test_out_of_bounds_point() {
        let mut kf = Keyframe::new(1.0);
        assert!(matches!(
            kf.get_point(3),
            Err(crate::error::ReelError::Keyframe(KeyframeError::OutOfBoundsPoint { index: 3, count: 1 }))
        ));
        assert!(kf.remove_point_at(-1).is_err());
        assert!(kf.remove_point(&Point::new(9.0, 9.0)).is_err());
        kf.remove_point_at(0).unwrap();
        assert_eq!(kf.get_count(), 0);
    }

    #[test]
    fn test_delta_and_increasing() {
        let mut kf = Keyframe::default();
        kf.add_point_with(1.0, 1.0, InterpolationType::Linear);
        kf.add_point_with(5.0, 5.0, InterpolationType::Linear);
        kf.add_point_with(9.0, 1.0, InterpolationType::Linear);

        assert_eq!(kf.get_delta(1), 1.0);
        assert_eq!(kf.get_delta(3), 1.0);
        assert_eq!(kf.get_delta(7), -1.0);
        assert_eq!(kf.get_delta(100), 0.0);
        assert!(kf.is_increasing(2));
        assert!(!kf.is_increasing(6));
    }

    #[test]
    fn test_repeat_fraction() {
        let mut kf = Keyframe::default();
        kf.add_point_with(1.0, 1.0, InterpolationType::Linear);
        kf.add_point_with(10.0, 1.0, InterpolationType::Linear);
        kf.add_point_with(11.0, 2.0, InterpolationType::Linear);

        assert_eq!(kf.get_repeat_fraction(1), Fraction::new(1, 10));
        assert_eq!(kf.get_repeat_fraction(5), Fraction::new(5, 10));
        assert_eq!(kf.get_repeat_fraction(0), Fraction::new(1, 1));
    }

    #[test]
    fn test_scale_and_flip() {
        let mut kf = Keyframe::default();
        kf.add_point(1.0, 0.0);
        kf.add_point(10.0, 5.0);
        kf.add_point(20.0, 10.0);

        kf.scale_points(2.0);
        let xs: Vec<f64> = kf.points().iter().map(|p| p.co.x).collect();
        assert_eq!(xs, vec![1.0, 20.0, 40.0]);

        kf.flip_points();
        let ys: Vec<f64> = kf.points().iter().map(|p| p.co.y).collect();
        assert_eq!(ys, vec![10.0, 5.0, 0.0]);
    }

    #[test]
    fn test_closest_and_previous() {
        let mut kf = Keyframe::default();
        kf.add_point(1.0, 0.0);
        kf.add_point(10.0, 4.0);
        kf.add_point(20.0, 2.0);

        assert_eq!(kf.get_closest_point(&Point::new(5.0, 0.0), false).co.x, 10.0);
        assert_eq!(kf.get_closest_point(&Point::new(5.0, 0.0), true).co.x, 1.0);
        assert_eq!(kf.get_closest_point(&Point::new(50.0, 0.0), false).co.x, 20.0);
        assert_eq!(kf.get_previous_point(&Point::new(20.0, 2.0)).co.x, 10.0);
        assert_eq!(kf.get_previous_point(&Point::new(3.0, 3.0)).co.x, -1.0);
        assert_eq!(kf.get_max_point().co.y, 4.0);
    }

    #[test]
    fn test_json() {
        let mut kf = Keyframe::default();
        kf.add_point(1.0, 0.5);
        kf.add_point_with(30.0, 1.0, InterpolationType::Linear);

        let json = kf.to_json().unwrap();
        let back = Keyframe::from_json(&json).unwrap();
        assert_eq!(back, kf);

        assert!(Keyframe::from_json("{\"points\": 3}").is_err());
    }
}
