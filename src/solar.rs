//! Low-precision solar ephemeris.
//!
//! NOAA general solar position algorithm (Meeus, chapter 25 simplified).
//! Accurate to roughly 0.01° in declination over 1950–2050, which is far
//! tighter than any horizon threshold we gate on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed observer location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObserverLocation {
    /// Geodetic latitude, degrees north positive.
    pub latitude_deg: f64,
    /// Longitude, degrees east positive.
    pub longitude_deg: f64,
    /// Height above sea level, metres.
    pub elevation_m: f64,
}

impl ObserverLocation {
    /// Siding Spring Observatory.
    pub const SIDING_SPRING: Self = Self {
        latitude_deg: -31.2733,
        longitude_deg: 149.0617,
        elevation_m: 1165.0,
    };
}

/// Julian date of the Unix epoch.
const UNIX_EPOCH_JD: f64 = 2_440_587.5;
/// Julian date of J2000.0.
const J2000_JD: f64 = 2_451_545.0;

fn julian_date(at: DateTime<Utc>) -> f64 {
    let secs = at.timestamp() as f64 + f64::from(at.timestamp_subsec_nanos()) * 1e-9;
    secs / 86_400.0 + UNIX_EPOCH_JD
}

/// Apparent solar right ascension and declination, degrees.
fn sun_equatorial(jd: f64) -> (f64, f64) {
    let t = (jd - J2000_JD) / 36_525.0;

    let mean_long = (280.466_46 + t * (36_000.769_83 + t * 0.000_303_2)).rem_euclid(360.0);
    let mean_anom = (357.529_11 + t * (35_999.050_29 - t * 0.000_153_7)).to_radians();

    let centre = mean_anom.sin() * (1.914_602 - t * (0.004_817 + t * 0.000_014))
        + (2.0 * mean_anom).sin() * (0.019_993 - t * 0.000_101)
        + (3.0 * mean_anom).sin() * 0.000_289;

    let omega = (125.04 - 1_934.136 * t).to_radians();
    let apparent_long = (mean_long + centre - 0.005_69 - 0.004_78 * omega.sin()).to_radians();

    let mean_obliquity =
        23.0 + (26.0 + (21.448 - t * (46.815 + t * (0.000_59 - t * 0.001_813))) / 60.0) / 60.0;
    let obliquity = (mean_obliquity + 0.002_56 * omega.cos()).to_radians();

    let ra = (obliquity.cos() * apparent_long.sin()).atan2(apparent_long.cos());
    let dec = (obliquity.sin() * apparent_long.sin()).asin();
    (ra.to_degrees(), dec.to_degrees())
}

/// Greenwich mean sidereal time, degrees.
fn gmst_deg(jd: f64) -> f64 {
    let d = jd - J2000_JD;
    let t = d / 36_525.0;
    (280.460_618_37 + 360.985_647_366_29 * d + 0.000_387_933 * t * t - t * t * t / 38_710_000.0)
        .rem_euclid(360.0)
}

/// Dip of the sea-level horizon seen from `elevation_m`, degrees.
fn horizon_dip_deg(elevation_m: f64) -> f64 {
    if elevation_m <= 0.0 {
        0.0
    } else {
        0.0293 * elevation_m.sqrt()
    }
}

/// Sun altitude above the observer's apparent horizon, degrees.
///
/// Geometric altitude plus the elevation dip correction; atmospheric
/// refraction is ignored.
pub fn sun_altitude(location: &ObserverLocation, at: DateTime<Utc>) -> f64 {
    let jd = julian_date(at);
    let (ra, dec) = sun_equatorial(jd);

    let hour_angle = (gmst_deg(jd) + location.longitude_deg - ra).to_radians();
    let lat = location.latitude_deg.to_radians();
    let dec = dec.to_radians();

    let sin_alt = lat.sin() * dec.sin() + lat.cos() * dec.cos() * hour_angle.cos();
    sin_alt.clamp(-1.0, 1.0).asin().to_degrees() + horizon_dip_deg(location.elevation_m)
}
