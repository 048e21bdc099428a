use chrono::Utc;
use tracking::{CoordinateService, Observer, Satellite, Sky, Target};
use std::sync::Arc;

fn main() {
    let iss = Satellite::from_tle(
        Some("ISS (ZARYA)".to_owned()),
        "1 25544U 98067A   25186.50618345  .00006730  00000+0  12412-3 0  9992",
        "2 25544  51.6343 216.2777 0002492 336.9059  23.1817 15.50384048518002",
    )
    .unwrap();

    let ecublens = Sky::new(Observer::new(46.5194444, 6.565, 411.0));
    let target = Target::Satellite(Arc::new(iss));

    let now = Utc::now();
    let position = ecublens.horizontal(&target, now).unwrap();

    println!(
        "ISS now: Az={:.1}°, El={:.1}°",
        position.azimuth, position.elevation
    );

    let sky = ecublens.equatorial(position, now);
    let galactic = ecublens.galactic(position, now);

    println!("     RA={:.2}°, Dec={:.2}°", sky.ra, sky.dec);
    println!("     l={:.2}°, b={:.2}°", galactic.longitude, galactic.latitude);
}
