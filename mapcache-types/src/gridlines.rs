//! Latitude/longitude grid lines for a visible map area.
//!
//! Line spacing depends on the zoom level (see [`incrementor`]). Start and end values are snapped
//! outwards from the visible box so that lines stay at the same geographic positions while the map
//! is panned.

use serde::{Deserialize, Serialize};

use crate::bounding_box::GeoBoundingBox;
use crate::geo::{GeoPoint2d, NewGeoPoint};

/// Grid lines are not produced below this zoom level: the visible area is wider than the world
/// and wrapped edges make the ranges meaningless.
pub const MIN_GRID_ZOOM: u32 = 2;

/// Up to this zoom level start and end points are found by stepping with a single increment.
const BRUTE_FORCE_ZOOM: u32 = 10;

/// Spacing in degrees for zoom levels `0..=29`. Deeper levels use the last value.
const INCREMENTS: [f64; 30] = [
    30.0,
    30.0,
    15.0,
    9.0,
    6.0,
    3.0,
    2.0,
    1.0,
    0.5,
    0.25,
    0.1,
    0.05,
    0.025,
    0.0125,
    0.00625,
    0.003125,
    0.0015625,
    0.00078125,
    0.000390625,
    0.0001953125,
    0.00009765625,
    0.000048828125,
    0.0000244140625,
    0.00001220703125,
    0.000006103515625,
    0.0000030517578125,
    0.00000152587890625,
    0.000000762939453125,
    0.0000003814697265625,
    0.00000019073486328125,
];

/// Distance in degrees between two neighbouring grid lines at the given zoom level, scaled by
/// `multiplier`.
pub fn incrementor(zoom: u32, multiplier: f64) -> f64 {
    let index = (zoom as usize).min(INCREMENTS.len() - 1);
    INCREMENTS[index] * multiplier
}

/// Orientation of a grid line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GridLineDirection {
    /// Line of constant latitude, running west to east.
    Parallel,
    /// Line of constant longitude, running north to south.
    Meridian,
}

/// Single grid line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridLine {
    /// Orientation of the line.
    pub direction: GridLineDirection,
    /// Latitude of a parallel or longitude of a meridian.
    pub value: f64,
    /// First point of the line.
    pub start: GeoPoint2d,
    /// Last point of the line.
    pub end: GeoPoint2d,
    /// Suggested position of the label, one increment inside the visible area.
    pub label_position: GeoPoint2d,
}

impl GridLine {
    /// Text label of the line, e.g. `12.5N` or `0.025W`.
    pub fn label(&self) -> String {
        let suffix = match (self.direction, self.value) {
            (_, v) if v == 0.0 => "",
            (GridLineDirection::Parallel, v) if v > 0.0 => "N",
            (GridLineDirection::Parallel, _) => "S",
            (GridLineDirection::Meridian, v) if v > 0.0 => "E",
            (GridLineDirection::Meridian, _) => "W",
        };

        format!("{}{suffix}", format_degrees(self.value.abs()))
    }
}

fn format_degrees(value: f64) -> String {
    let formatted = format!("{value:.5}");
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

/// Set of grid lines covering a visible area.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridLines {
    parallels: Vec<GridLine>,
    meridians: Vec<GridLine>,
    increment: f64,
}

impl GridLines {
    /// Computes grid lines for the visible `bbox` at `zoom`.
    ///
    /// The result is empty below [`MIN_GRID_ZOOM`] and when the box wraps vertically
    /// (`north < south`). When the box crosses the antimeridian (`east < 0 < west`), meridians
    /// are produced for both `[start, 180]` and `[-180, stop]`.
    pub fn compute(bbox: &GeoBoundingBox, zoom: u32, multiplier: f64) -> Self {
        let increment = incrementor(zoom, multiplier);
        if zoom < MIN_GRID_ZOOM || !is_valid_increment(increment) {
            return Self::default();
        }

        let north = bbox.north();
        let south = bbox.south();
        let east = bbox.east();
        let west = bbox.west();

        if north < south {
            return Self::default();
        }

        let (lat_start, lat_stop) = latitude_range(north, south, zoom, multiplier);
        let parallels = steps(lat_start, lat_stop, increment)
            .map(|lat| GridLine {
                direction: GridLineDirection::Parallel,
                value: lat,
                start: GeoPoint2d::latlon(lat, west),
                end: GeoPoint2d::latlon(lat, east),
                label_position: GeoPoint2d::latlon(lat, west + increment),
            })
            .collect();

        let (lon_start, lon_stop) = longitude_range(west, east, zoom, multiplier);
        let meridian = |lon: f64| GridLine {
            direction: GridLineDirection::Meridian,
            value: lon,
            start: GeoPoint2d::latlon(north, lon),
            end: GeoPoint2d::latlon(south, lon),
            label_position: GeoPoint2d::latlon(south + increment, lon),
        };

        let crosses_antimeridian = east < 0.0 && west > 0.0;
        let meridians = if crosses_antimeridian {
            steps(lon_start, 180.0, increment)
                .chain(steps(-180.0, lon_stop, increment))
                .map(meridian)
                .collect()
        } else {
            steps(lon_start, lon_stop, increment).map(meridian).collect()
        };

        Self {
            parallels,
            meridians,
            increment,
        }
    }

    /// Lines of constant latitude, from south to north.
    pub fn parallels(&self) -> &[GridLine] {
        &self.parallels
    }

    /// Lines of constant longitude.
    pub fn meridians(&self) -> &[GridLine] {
        &self.meridians
    }

    /// All the lines: parallels first, then meridians.
    pub fn iter(&self) -> impl Iterator<Item = &GridLine> {
        self.parallels.iter().chain(self.meridians.iter())
    }

    /// Distance between neighbouring lines in degrees.
    pub fn increment(&self) -> f64 {
        self.increment
    }

    /// Returns true if there are no lines.
    pub fn is_empty(&self) -> bool {
        self.parallels.is_empty() && self.meridians.is_empty()
    }
}

/// First and last latitude of the grid for the visible latitude range.
pub fn latitude_range(north: f64, south: f64, zoom: u32, multiplier: f64) -> (f64, f64) {
    if !is_valid_increment(incrementor(zoom, multiplier)) {
        return (south, north);
    }

    if zoom < BRUTE_FORCE_ZOOM {
        let increment = incrementor(zoom, multiplier);

        let mut start = -90.0;
        while start + increment <= south {
            start += increment;
        }

        let mut stop = 90.0;
        while stop - increment >= north {
            stop -= increment;
        }

        (start.max(-90.0), stop.min(90.0))
    } else {
        let mut start = if south > 0.0 { 0.0 } else { -90.0 };
        let mut stop = if north < 0.0 { 0.0 } else { 90.0 };

        for level in MIN_GRID_ZOOM..=zoom {
            let increment = incrementor(level, multiplier);
            while start < south - increment {
                start += increment;
            }
            while stop > north + increment {
                stop -= increment;
            }
        }

        (start, stop)
    }
}

/// First and last longitude of the grid for the visible longitude range.
///
/// When the range crosses the antimeridian the first value is greater than the last one.
pub fn longitude_range(west: f64, east: f64, zoom: u32, multiplier: f64) -> (f64, f64) {
    if !is_valid_increment(incrementor(zoom, multiplier)) {
        return (west, east);
    }

    if zoom < BRUTE_FORCE_ZOOM {
        let increment = incrementor(zoom, multiplier);

        let mut start = 180.0;
        while start > west {
            start -= increment;
        }

        let mut stop = -180.0;
        while stop < east {
            stop += increment;
        }

        (start.max(-180.0), stop.min(180.0))
    } else {
        let mut start = if west > 0.0 { 0.0 } else { -180.0 };
        let mut stop = if east < 0.0 { 0.0 } else { 180.0 };

        for level in MIN_GRID_ZOOM..=zoom {
            let increment = incrementor(level, multiplier);
            while stop > east + increment {
                stop -= increment;
            }
            while start < west - increment {
                start += increment;
            }
        }

        (start, stop)
    }
}

fn is_valid_increment(increment: f64) -> bool {
    increment > 0.0 && increment.is_finite()
}

/// Values `start, start + step, ...` up to and including `stop`.
fn steps(start: f64, stop: f64, step: f64) -> impl Iterator<Item = f64> {
    let count = if stop < start {
        0
    } else {
        // Tolerance absorbs the rounding of accumulated increments.
        ((stop - start) / step + 1e-9).floor() as usize + 1
    };

    (0..count).map(move |i| start + step * i as f64)
}
