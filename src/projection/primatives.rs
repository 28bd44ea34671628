use std::ops::Sub;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval<T> {
    pub min: T,
    pub max: T,
}

impl<T> Interval<T> {
    pub fn new(min: T, max: T) -> Self {
        Self { min, max }
    }
}

impl<T: Copy + Sub<Output = T>> Interval<T> {
    pub fn range(&self) -> T {
        self.max - self.min
    }
}

impl<T: Copy + PartialOrd> Interval<T> {
    pub fn overlaps(&self, other: &Self) -> bool {
        self.min < other.max && other.min < self.max
    }
}

/// Axis aligned box, `x` west to east and `y` south to north in world units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region<T> {
    pub x: Interval<T>,
    pub y: Interval<T>,
}

impl<T> Region<T> {
    pub fn new(min_x: T, min_y: T, max_x: T, max_y: T) -> Self {
        Self {
            x: Interval::new(min_x, max_x),
            y: Interval::new(min_y, max_y),
        }
    }
}

impl<T: Copy> Region<T> {
    pub fn as_tuple(&self) -> (T, T, T, T) {
        (self.x.min, self.y.min, self.x.max, self.y.max)
    }

    pub fn x_min(&self) -> T {
        self.x.min
    }

    pub fn y_min(&self) -> T {
        self.y.min
    }

    pub fn x_max(&self) -> T {
        self.x.max
    }

    pub fn y_max(&self) -> T {
        self.y.max
    }
}

impl Region<f64> {
    /// Strict overlap, touching edges do not count.
    pub fn intersects(&self, other: &Self) -> bool {
        self.x.overlaps(&other.x) && self.y.overlaps(&other.y)
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.x.range() > 0.0 && self.y.range() > 0.0)
    }

    pub fn is_finite(&self) -> bool {
        self.x.min.is_finite()
            && self.x.max.is_finite()
            && self.y.min.is_finite()
            && self.y.max.is_finite()
    }

    pub fn union(&self, other: &Self) -> Self {
        Self::new(
            self.x.min.min(other.x.min),
            self.y.min.min(other.y.min),
            self.x.max.max(other.x.max),
            self.y.max.max(other.y.max),
        )
    }

    pub fn from_points(points: &[(f64, f64)]) -> Option<Self> {
        let (&(x, y), rest) = points.split_first()?;
        Some(rest.iter().fold(Self::new(x, y, x, y), |r, &(x, y)| {
            Self::new(r.x.min.min(x), r.y.min.min(y), r.x.max.max(x), r.y.max.max(y))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touching_regions_do_not_intersect() {
        let a = Region::new(0.0, 0.0, 10.0, 10.0);
        let b = Region::new(10.0, 0.0, 20.0, 10.0);
        let c = Region::new(9.0, 9.0, 20.0, 20.0);
        assert!(!a.intersects(&b));
        assert!(a.intersects(&c));
        assert_eq!(a.union(&b), Region::new(0.0, 0.0, 20.0, 10.0));
    }

    #[test]
    fn bounds_of_points() {
        let r = Region::from_points(&[(1.0, 5.0), (-2.0, 3.0), (4.0, -1.0)]).unwrap();
        assert_eq!(r.as_tuple(), (-2.0, -1.0, 4.0, 5.0));
        assert!(Region::from_points(&[]).is_none());
        assert!(Region::new(1.0, 1.0, 1.0, 3.0).is_degenerate());
    }
}
