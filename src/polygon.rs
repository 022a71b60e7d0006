//! Coarse-mesh cells and their polygon geometry.

/// Exterior ring of a polygon in projected coordinates. The ring may or may
/// not repeat its first vertex at the end.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub exterior: Vec<(f64, f64)>,
}

impl Polygon {
    pub fn new(exterior: Vec<(f64, f64)>) -> Self {
        Polygon { exterior }
    }

    /// Axis-aligned square centred on `(cx, cy)`.
    pub fn square(cx: f64, cy: f64, side: f64) -> Self {
        let h = side / 2.0;
        Polygon::new(vec![
            (cx - h, cy - h),
            (cx + h, cy - h),
            (cx + h, cy + h),
            (cx - h, cy + h),
            (cx - h, cy - h),
        ])
    }

    /// Signed shoelace area (positive for counter-clockwise rings).
    pub fn signed_area(&self) -> f64 {
        let Some(&(ox, oy)) = self.exterior.first() else {
            return 0.0;
        };
        self.edges()
            .map(|((x0, y0), (x1, y1))| (x0 - ox) * (y1 - oy) - (x1 - ox) * (y0 - oy))
            .sum::<f64>()
            / 2.0
    }

    /// Area-weighted centroid of the exterior ring.
    ///
    /// Degenerate rings (zero area) fall back to the mean of their vertices;
    /// an empty ring has no centroid.
    pub fn centroid(&self) -> Option<(f64, f64)> {
        let vertices = self.open_ring();
        if vertices.is_empty() {
            return None;
        }

        // Shift to the first vertex to keep the cross products small for
        // large projected coordinates.
        let (ox, oy) = vertices[0];
        let mut area2 = 0.0;
        let mut cx = 0.0;
        let mut cy = 0.0;
        for ((x0, y0), (x1, y1)) in self.edges() {
            let (x0, y0, x1, y1) = (x0 - ox, y0 - oy, x1 - ox, y1 - oy);
            let cross = x0 * y1 - x1 * y0;
            area2 += cross;
            cx += (x0 + x1) * cross;
            cy += (y0 + y1) * cross;
        }

        if area2.abs() <= f64::EPSILON * vertices.len() as f64 {
            let n = vertices.len() as f64;
            let (sx, sy) = vertices
                .iter()
                .fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x, sy + y));
            return Some((sx / n, sy / n));
        }

        Some((ox + cx / (3.0 * area2), oy + cy / (3.0 * area2)))
    }

    // Ring without the closing duplicate vertex
    fn open_ring(&self) -> &[(f64, f64)] {
        match (self.exterior.first(), self.exterior.last()) {
            (Some(first), Some(last)) if self.exterior.len() > 1 && first == last => {
                &self.exterior[..self.exterior.len() - 1]
            }
            _ => &self.exterior,
        }
    }

    fn edges(&self) -> impl Iterator<Item = ((f64, f64), (f64, f64))> + '_ {
        let ring = self.open_ring();
        let n = ring.len();
        (0..n).map(move |i| (ring[i], ring[(i + 1) % n]))
    }
}

/// One record of the coarse NWP mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct CoarseCell {
    pub station_id: String,
    pub polygon: Polygon,
}

impl CoarseCell {
    pub fn new(station_id: impl Into<String>, polygon: Polygon) -> Self {
        CoarseCell {
            station_id: station_id.into(),
            polygon,
        }
    }
}
