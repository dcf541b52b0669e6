/// Planner coordinates live on a 0..=1000 grid regardless of screen size.
pub const GRID: i64 = 1000;

/// Convert a grid coordinate to a pixel offset along a dimension of
/// `dimension` pixels: `floor(coord / 1000 * dimension)`.
///
/// Values outside the grid are not rejected and extrapolate linearly.
pub fn denormalize(coord: i64, dimension: u32) -> i64 {
    (coord * i64::from(dimension)).div_euclid(GRID)
}

pub fn clamp(coord: i64) -> i64 {
    coord.clamp(0, GRID)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_edges_map_to_viewport_edges() {
        for d in [1, 7, 900, 1440, 2560] {
            assert_eq!(denormalize(0, d), 0);
            assert_eq!(denormalize(1000, d), i64::from(d));
        }
    }

    #[test]
    fn matches_floor_formula() {
        for d in [1u32, 3, 768, 900, 1440] {
            for c in 0..=1000 {
                let expected = (c as f64 * d as f64 / 1000.0).floor() as i64;
                assert_eq!(denormalize(c, d), expected, "coord {c} dim {d}");
            }
        }
    }

    #[test]
    fn out_of_grid_extrapolates() {
        assert_eq!(denormalize(1500, 1000), 1500);
        assert_eq!(denormalize(-1, 1000), -1);
        assert_eq!(denormalize(-1, 999), -1);
    }

    #[test]
    fn clamp_pins_to_grid() {
        assert_eq!(clamp(-5), 0);
        assert_eq!(clamp(1001), 1000);
        assert_eq!(clamp(640), 640);
    }
}
