//! Maidenhead grid locators, great-circle distance and bearing.

use crate::types::{AutoftError, Result};

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Centre of a Maidenhead locator as `(lat, lon)` in degrees.
///
/// Accepts 4, 6 or 8 character locators (`FN42`, `CM87vl`, `JO62qm41`),
/// case-insensitive.
pub fn grid_to_latlon(grid: &str) -> Result<(f64, f64)> {
    let g: Vec<u8> = grid.trim().bytes().collect();
    if !matches!(g.len(), 4 | 6 | 8) {
        return Err(invalid(grid));
    }

    let field = |b: u8| -> Result<f64> {
        let c = b.to_ascii_uppercase();
        if (b'A'..=b'R').contains(&c) {
            Ok((c - b'A') as f64)
        } else {
            Err(invalid(grid))
        }
    };
    let digit = |b: u8| -> Result<f64> {
        if b.is_ascii_digit() {
            Ok((b - b'0') as f64)
        } else {
            Err(invalid(grid))
        }
    };
    let subsquare = |b: u8| -> Result<f64> {
        let c = b.to_ascii_lowercase();
        if (b'a'..=b'x').contains(&c) {
            Ok((c - b'a') as f64)
        } else {
            Err(invalid(grid))
        }
    };

    let mut lon = -180.0 + field(g[0])? * 20.0 + digit(g[2])? * 2.0;
    let mut lat = -90.0 + field(g[1])? * 10.0 + digit(g[3])?;
    let (mut lon_size, mut lat_size) = (2.0, 1.0);

    if g.len() >= 6 {
        lon_size /= 24.0;
        lat_size /= 24.0;
        lon += subsquare(g[4])? * lon_size;
        lat += subsquare(g[5])? * lat_size;
    }
    if g.len() == 8 {
        lon_size /= 10.0;
        lat_size /= 10.0;
        lon += digit(g[6])? * lon_size;
        lat += digit(g[7])? * lat_size;
    }

    Ok((lat + lat_size / 2.0, lon + lon_size / 2.0))
}

fn invalid(grid: &str) -> AutoftError {
    AutoftError::InvalidField {
        field: "grid",
        value: grid.to_string(),
    }
}

/// True for a well-formed 4, 6 or 8 character locator.
pub fn is_grid(s: &str) -> bool {
    grid_to_latlon(s).is_ok()
}

/// Great-circle distance in kilometres between two points (degrees).
pub fn distance_km(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lon1) = from;
    let (lat2, lon2) = to;
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    EARTH_RADIUS_KM * 2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Initial bearing in degrees `[0, 360)` from `from` towards `to`.
pub fn azimuth(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lon1) = (from.0.to_radians(), from.1.to_radians());
    let (lat2, lon2) = (to.0.to_radians(), to.1.to_radians());
    let dlon = lon2 - lon1;
    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
