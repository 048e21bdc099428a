//! Equatorial, galactic and horizontal conversions for a fixed observing site.
//!
//! Precision is that of the mean sidereal time and of the J2000 galactic
//! pole: well under the beam width of a small radio telescope, without
//! nutation, aberration or refraction corrections.

use crate::{
    CoordinateService, Degrees, Equatorial, Galactic, Horizontal, Observer, Target, TrackingError,
    satellite::predict_site,
};
use chrono::{DateTime, Utc};
use predict_rs::predict::PredictObserver;

const UNIX_EPOCH_JD: f64 = 2_440_587.5;
const J2000_JD: f64 = 2_451_545.0;

/// Right ascension of the north galactic pole (J2000), in degrees.
const NGP_RA: Degrees = 192.859_48;
/// Declination of the north galactic pole (J2000), in degrees.
const NGP_DEC: Degrees = 27.128_25;
/// Galactic longitude of the north celestial pole (J2000), in degrees.
const NCP_LONGITUDE: Degrees = 122.931_92;

pub fn julian_date(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 86_400_000.0 + UNIX_EPOCH_JD
}

/// Greenwich mean sidereal time, in degrees.
pub fn gmst(at: DateTime<Utc>) -> Degrees {
    let d = julian_date(at) - J2000_JD;
    let t = d / 36_525.0;

    (280.460_618_37 + 360.985_647_366_29 * d + 0.000_387_933 * t * t - t * t * t / 38_710_000.0)
        .rem_euclid(360.0)
}

/// Local mean sidereal time at `longitude` (positive east), in degrees.
pub fn local_sidereal_time(at: DateTime<Utc>, longitude: Degrees) -> Degrees {
    (gmst(at) + longitude).rem_euclid(360.0)
}

pub fn galactic_to_equatorial(position: Galactic) -> Equatorial {
    let (l, b) = (position.longitude.to_radians(), position.latitude.to_radians());
    let (ra0, dec0, l0) = (
        NGP_RA.to_radians(),
        NGP_DEC.to_radians(),
        NCP_LONGITUDE.to_radians(),
    );

    let sin_dec = dec0.sin() * b.sin() + dec0.cos() * b.cos() * (l0 - l).cos();
    let y = b.cos() * (l0 - l).sin();
    let x = dec0.cos() * b.sin() - dec0.sin() * b.cos() * (l0 - l).cos();

    Equatorial {
        ra: (ra0 + y.atan2(x)).to_degrees().rem_euclid(360.0),
        dec: sin_dec.clamp(-1.0, 1.0).asin().to_degrees(),
    }
}

pub fn equatorial_to_galactic(position: Equatorial) -> Galactic {
    let (ra, dec) = (position.ra.to_radians(), position.dec.to_radians());
    let (ra0, dec0, l0) = (
        NGP_RA.to_radians(),
        NGP_DEC.to_radians(),
        NCP_LONGITUDE.to_radians(),
    );

    let sin_b = dec0.sin() * dec.sin() + dec0.cos() * dec.cos() * (ra - ra0).cos();
    let y = dec.cos() * (ra - ra0).sin();
    let x = dec0.cos() * dec.sin() - dec0.sin() * dec.cos() * (ra - ra0).cos();

    Galactic {
        longitude: (l0 - y.atan2(x)).to_degrees().rem_euclid(360.0),
        latitude: sin_b.clamp(-1.0, 1.0).asin().to_degrees(),
    }
}

/// Coordinate conversions as seen from one observing site.
pub struct Sky {
    site: Observer,
    predict: PredictObserver,
}

impl Sky {
    pub fn new(site: Observer) -> Self {
        Self {
            predict: predict_site(&site),
            site,
        }
    }

    pub fn site(&self) -> &Observer {
        &self.site
    }

    pub fn equatorial_to_horizontal(&self, position: Equatorial, at: DateTime<Utc>) -> Horizontal {
        let lst = local_sidereal_time(at, self.site.longitude);
        let ha = (lst - position.ra).to_radians();
        let dec = position.dec.to_radians();
        let lat = self.site.latitude.to_radians();

        let sin_alt = dec.sin() * lat.sin() + dec.cos() * lat.cos() * ha.cos();
        let y = -ha.sin() * dec.cos();
        let x = lat.cos() * dec.sin() - lat.sin() * dec.cos() * ha.cos();

        Horizontal {
            azimuth: y.atan2(x).to_degrees().rem_euclid(360.0),
            elevation: sin_alt.clamp(-1.0, 1.0).asin().to_degrees(),
        }
    }

    pub fn horizontal_to_equatorial(&self, position: Horizontal, at: DateTime<Utc>) -> Equatorial {
        let lst = local_sidereal_time(at, self.site.longitude);
        let az = position.azimuth.to_radians();
        let alt = position.elevation.to_radians();
        let lat = self.site.latitude.to_radians();

        let sin_dec = alt.sin() * lat.sin() + alt.cos() * lat.cos() * az.cos();
        let y = -az.sin() * alt.cos();
        let x = lat.cos() * alt.sin() - lat.sin() * alt.cos() * az.cos();
        let ha = y.atan2(x).to_degrees();

        Equatorial {
            ra: (lst - ha).rem_euclid(360.0),
            dec: sin_dec.clamp(-1.0, 1.0).asin().to_degrees(),
        }
    }
}

impl CoordinateService for Sky {
    fn horizontal(&self, target: &Target, at: DateTime<Utc>) -> Result<Horizontal, TrackingError> {
        match target {
            Target::Equatorial(position) => Ok(self.equatorial_to_horizontal(*position, at)),
            Target::Galactic(position) => {
                Ok(self.equatorial_to_horizontal(galactic_to_equatorial(*position), at))
            }
            Target::Satellite(satellite) => satellite.observe(&self.predict, at),
        }
    }

    fn equatorial(&self, position: Horizontal, at: DateTime<Utc>) -> Equatorial {
        self.horizontal_to_equatorial(position, at)
    }

    fn galactic(&self, position: Horizontal, at: DateTime<Utc>) -> Galactic {
        equatorial_to_galactic(self.horizontal_to_equatorial(position, at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-3;

    fn assert_approx_eq(a: f64, b: f64, epsilon: f64) {
        assert!(
            (a - b).abs() < epsilon,
            "Expected {} to be close to {}",
            a,
            b
        );
    }

    /// Difference between two angles, folded into [0, 180].
    fn angular_gap(a: Degrees, b: Degrees) -> Degrees {
        let gap = (a - b).rem_euclid(360.0);
        gap.min(360.0 - gap)
    }

    fn j2000() -> DateTime<Utc> {
        // 2000-01-01T12:00:00Z
        DateTime::from_timestamp(946_728_000, 0).unwrap()
    }

    fn ecublens() -> Sky {
        Sky::new(Observer::new(46.5194444, 6.565, 411.0))
    }

    #[test]
    fn julian_date_at_j2000() {
        assert_approx_eq(julian_date(j2000()), J2000_JD, 1e-9);
    }

    #[test]
    fn gmst_at_j2000() {
        assert_approx_eq(gmst(j2000()), 280.460_618_37, 1e-6);
    }

    #[test]
    fn sidereal_day_is_shorter_than_solar_day() {
        let later = j2000() + chrono::Duration::days(1);

        // One solar day advances sidereal time by about 0.9856 degrees.
        assert_approx_eq(
            (gmst(later) - gmst(j2000())).rem_euclid(360.0),
            0.985_647,
            1e-4,
        );
    }

    #[test]
    fn galactic_center_in_equatorial() {
        let center = galactic_to_equatorial(Galactic::new(0.0, 0.0));

        assert_approx_eq(center.ra, 266.405, 0.01);
        assert_approx_eq(center.dec, -28.936, 0.01);
    }

    #[test]
    fn galactic_pole_has_latitude_90() {
        let pole = equatorial_to_galactic(Equatorial::new(NGP_RA, NGP_DEC));

        assert_approx_eq(pole.latitude, 90.0, EPSILON);
    }

    #[test]
    fn galactic_center_back_from_equatorial() {
        let center = equatorial_to_galactic(Equatorial::new(266.405, -28.936));

        assert!(angular_gap(center.longitude, 0.0) < 0.01);
        assert_approx_eq(center.latitude, 0.0, 0.01);
    }

    #[test]
    fn star_on_meridian_at_site_latitude_is_at_zenith() {
        let sky = ecublens();
        let at = j2000();
        let lst = local_sidereal_time(at, sky.site().longitude);

        let position = sky.equatorial_to_horizontal(Equatorial::new(lst, sky.site().latitude), at);

        assert_approx_eq(position.elevation, 90.0, EPSILON);
    }

    #[test]
    fn celestial_equator_on_meridian_is_due_south() {
        let sky = ecublens();
        let at = j2000();
        let lst = local_sidereal_time(at, sky.site().longitude);

        let position = sky.equatorial_to_horizontal(Equatorial::new(lst, 0.0), at);

        assert_approx_eq(position.azimuth, 180.0, EPSILON);
        assert_approx_eq(position.elevation, 90.0 - sky.site().latitude, EPSILON);
    }

    #[test]
    fn rising_star_is_in_the_east() {
        let sky = ecublens();
        let at = j2000();
        let lst = local_sidereal_time(at, sky.site().longitude);

        // Six hours before transit.
        let position = sky.equatorial_to_horizontal(Equatorial::new(lst + 90.0, 0.0), at);

        assert_approx_eq(position.azimuth, 90.0, EPSILON);
        assert_approx_eq(position.elevation, 0.0, EPSILON);
    }

    #[test]
    fn horizontal_back_to_equatorial() {
        let sky = ecublens();
        let at = j2000() + chrono::Duration::hours(7);
        let target = Equatorial::new(83.633, 22.0145);

        let position = sky.equatorial_to_horizontal(target, at);
        let back = sky.horizontal_to_equatorial(position, at);

        assert!(angular_gap(back.ra, target.ra) < EPSILON);
        assert_approx_eq(back.dec, target.dec, EPSILON);
    }

    #[test]
    fn galactic_target_goes_through_equatorial() {
        let sky = ecublens();
        let at = j2000();
        let target = Galactic::new(30.0, 2.0);

        let direct = sky.horizontal(&Target::Galactic(target), at).unwrap();
        let via = sky.equatorial_to_horizontal(galactic_to_equatorial(target), at);

        assert_eq!(direct, via);
    }
}
