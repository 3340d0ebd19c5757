use crate::config::SunSamplingConfig;
use crate::types::{AnalysisError, SunSample};
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use geo_types::Point;

/// Low-precision solar position (about 0.01 degrees in declination) for one
/// observer location.
pub struct SunCalculator {
    latitude: f64,
    longitude: f64,
}

impl SunCalculator {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// `(azimuth, elevation)` in degrees; azimuth clockwise from north.
    pub fn get_position(&self, datetime: &DateTime<Utc>) -> (f64, f64) {
        let julian_day = self.julian_day(datetime);
        let equation_of_time = self.equation_of_time(julian_day);
        let declination = self.solar_declination(julian_day);

        let solar_time = self.solar_time(datetime, equation_of_time);
        let hour_angle = wrap_degrees(15.0 * (solar_time - 12.0));

        let lat_rad = self.latitude.to_radians();
        let dec_rad = declination.to_radians();
        let hour_rad = hour_angle.to_radians();

        let elevation = (lat_rad.sin() * dec_rad.sin()
            + lat_rad.cos() * dec_rad.cos() * hour_rad.cos())
        .clamp(-1.0, 1.0)
        .asin();

        let cos_elevation = elevation.cos();
        let azimuth = if cos_elevation.abs() < 1e-12 {
            std::f64::consts::PI
        } else {
            ((dec_rad.sin() * lat_rad.cos() - dec_rad.cos() * lat_rad.sin() * hour_rad.cos())
                / cos_elevation)
                .clamp(-1.0, 1.0)
                .acos()
        };

        let azimuth_deg = if hour_angle > 0.0 {
            360.0 - azimuth.to_degrees()
        } else {
            azimuth.to_degrees()
        };

        (azimuth_deg, elevation.to_degrees())
    }

    fn julian_day(&self, datetime: &DateTime<Utc>) -> f64 {
        let a = (14 - datetime.month() as i32) / 12;
        let y = datetime.year() + 4800 - a;
        let m = datetime.month() as i32 + 12 * a - 3;

        let day_number = datetime.day() as i32 + (153 * m + 2) / 5 + 365 * y + y / 4 - y / 100
            + y / 400
            - 32045;
        let day_fraction = (datetime.hour() as f64 - 12.0) / 24.0
            + datetime.minute() as f64 / 1440.0
            + datetime.second() as f64 / 86_400.0;

        day_number as f64 + day_fraction
    }

    /// Minutes.
    fn equation_of_time(&self, julian_day: f64) -> f64 {
        let (n, l, lambda) = self.ecliptic_longitude(julian_day);
        let obliquity = (23.439 - 0.0000004 * n).to_radians();
        let lambda_rad = lambda.to_radians();
        let right_ascension = (obliquity.cos() * lambda_rad.sin())
            .atan2(lambda_rad.cos())
            .to_degrees();

        4.0 * wrap_degrees(l - 0.0057183 - right_ascension)
    }

    /// Degrees.
    fn solar_declination(&self, julian_day: f64) -> f64 {
        let (n, _, lambda) = self.ecliptic_longitude(julian_day);
        let obliquity = (23.439 - 0.0000004 * n).to_radians();
        (obliquity.sin() * lambda.to_radians().sin())
            .asin()
            .to_degrees()
    }

    /// Days since J2000, mean longitude and ecliptic longitude in degrees.
    fn ecliptic_longitude(&self, julian_day: f64) -> (f64, f64, f64) {
        let n = julian_day - 2451545.0;
        let l = (280.460 + 0.9856474 * n).rem_euclid(360.0);
        let g = (357.528 + 0.9856003 * n).rem_euclid(360.0).to_radians();
        let lambda = l + 1.915 * g.sin() + 0.020 * (2.0 * g).sin();
        (n, l, lambda)
    }

    /// Apparent solar time in hours.
    fn solar_time(&self, datetime: &DateTime<Utc>, equation_of_time: f64) -> f64 {
        let utc_time = datetime.hour() as f64
            + datetime.minute() as f64 / 60.0
            + datetime.second() as f64 / 3600.0;
        utc_time + equation_of_time / 60.0 + self.longitude / 15.0
    }
}

fn wrap_degrees(angle: f64) -> f64 {
    (angle + 180.0).rem_euclid(360.0) - 180.0
}

enum LocalClock {
    Zone(Tz),
    Fixed(FixedOffset),
}

impl LocalClock {
    fn resolve(config: &SunSamplingConfig, longitude: f64) -> Result<Self, AnalysisError> {
        if let Some(name) = &config.timezone {
            let tz = name
                .parse::<Tz>()
                .map_err(|e| AnalysisError::Config(format!("unknown timezone {}: {}", name, e)))?;
            return Ok(LocalClock::Zone(tz));
        }

        let hours = config
            .utc_offset_hours
            .unwrap_or_else(|| (longitude / 15.0).round().clamp(-12.0, 14.0) as i32);
        FixedOffset::east_opt(hours * 3600)
            .map(LocalClock::Fixed)
            .ok_or_else(|| AnalysisError::Config(format!("invalid UTC offset {}h", hours)))
    }

    fn to_utc(&self, date: NaiveDate, hour: u32) -> Option<DateTime<Utc>> {
        let local = date.and_hms_opt(hour, 0, 0)?;
        match self {
            LocalClock::Zone(tz) => tz
                .from_local_datetime(&local)
                .earliest()
                // inside a DST gap the wall-clock hour does not exist
                .or_else(|| tz.from_local_datetime(&(local + Duration::hours(1))).earliest())
                .map(|dt| dt.with_timezone(&Utc)),
            LocalClock::Fixed(offset) => offset
                .from_local_datetime(&local)
                .single()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

/// Produces the fixed sun-sample set for one run.
pub struct SunSampler {
    config: SunSamplingConfig,
}

impl SunSampler {
    pub fn new(config: SunSamplingConfig) -> Self {
        Self { config }
    }

    /// One sample per `(date, hour)` pair, dates outermost, at `reference`
    /// (lon, lat).
    pub fn sample(&self, reference: Point<f64>) -> Result<Vec<SunSample>, AnalysisError> {
        let clock = LocalClock::resolve(&self.config, reference.x())?;
        let calculator = SunCalculator::new(reference.y(), reference.x());

        let mut samples = Vec::with_capacity(self.config.sample_count());
        for &(month, day) in &self.config.dates {
            let date = NaiveDate::from_ymd_opt(self.config.year, month, day).ok_or_else(|| {
                AnalysisError::Config(format!(
                    "invalid sample date {}-{:02}-{:02}",
                    self.config.year, month, day
                ))
            })?;

            for &hour in &self.config.hours {
                let instant = clock.to_utc(date, hour).ok_or_else(|| {
                    AnalysisError::Config(format!("invalid local time {} {:02}:00", date, hour))
                })?;
                let (azimuth, elevation) = calculator.get_position(&instant);
                samples.push(SunSample {
                    date,
                    local_hour: hour,
                    instant,
                    altitude: elevation.to_radians(),
                    azimuth: azimuth.to_radians(),
                });
            }
        }

        Ok(samples)
    }
}
