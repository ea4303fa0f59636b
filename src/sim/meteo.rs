use anyhow::{Context, Result};
use serde::Serialize;

use super::weather::{AnnualWeather, WeatherSource};
use crate::quad;

/// Solar radiation components (W/m2 instantaneous, MJ/m2/day daily).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SolarRad {
    pub total: f64,
    pub direct: f64,
    pub diffuse: f64,
}

/// Solar position (radians).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SolarPos {
    /// Inclination, measured from the vertical.
    pub inc: f64,
    /// Elevation, measured from the horizontal.
    pub hgt: f64,
    /// Azimuth, from North clockwise.
    pub azi: f64,
}

/// Site and clock settings for the meteorology component.
#[derive(Debug, Clone, Copy)]
pub struct SiteConfig {
    /// Site latitude (degrees).
    pub lat: f64,
    /// Weather station height (m).
    pub methgt: f64,
    /// Starting day of year (1-365).
    pub doy: u32,
    /// Starting local solar hour.
    pub solarhour: f64,
    /// Dew temperature (deg C).
    pub dewtemp: f64,
    /// Hours after sunrise at which air temperature and wind are minimum.
    pub lag: f64,
    /// Reuse the same annual weather across year wraps.
    pub reuse_weather: bool,
}

/// Daily and hourly (instantaneous) meteorological state.
///
/// Daily quantities are recomputed when the day of year advances; hourly
/// quantities whenever the local solar hour is set. Time only moves forward,
/// one day at a time.
#[derive(Serialize)]
pub struct Meteo {
    #[serde(skip)]
    source: Box<dyn WeatherSource>,
    /// Latitude in radians.
    pub lat: f64,
    pub methgt: f64,
    pub dewtemp: f64,
    pub lag: f64,
    reuse: bool,

    pub doy: u32,
    pub solarhour: f64,
    /// Year number (years elapsed, starting at 1).
    pub nyears: u32,

    // sin(lat)sin(decl) and cos(lat)cos(decl), shared by the astronomy
    a: f64,
    b: f64,

    pub decl: f64,
    pub sunrise: f64,
    pub sunset: f64,
    pub daylen: f64,
    pub solarconst: f64,
    pub dayetrad: f64,
    pub dayrad: SolarRad,
    pub daytmin: f64,
    pub daytmax: f64,
    pub daytmean: f64,
    pub daywind: f64,
    pub dayrain: f64,

    pub solarpos: SolarPos,
    pub etrad: f64,
    pub rad: SolarRad,
    pub airtemp: f64,
    pub slopesvp: f64,
    pub svp: f64,
    pub vp: f64,
    pub vpd: f64,
    pub rh: f64,
    pub netrad: f64,
    pub windspd: f64,
}

/// Saturated vapor pressure (mbar) at the given air temperature (deg C).
pub fn svp_at(temp: f64) -> f64 {
    6.1078 * (17.269 * temp / (temp + 237.3)).exp()
}

/// Wraps a day of year into [1, 365].
pub fn doy365(doy: u32) -> u32 {
    ((doy - 1) % 365) + 1
}

impl Meteo {
    pub fn new(site: SiteConfig, source: Box<dyn WeatherSource>) -> Result<Self> {
        anyhow::ensure!(
            (1..=365).contains(&site.doy),
            "starting day of year must be in [1, 365], got {}",
            site.doy
        );
        for field in ["tmin", "tmax", "wind", "rain"] {
            source
                .table()
                .series(field)
                .with_context(|| format!("weather source must provide the '{field}' field"))?;
        }

        let mut met = Self {
            source,
            lat: site.lat.to_radians(),
            methgt: site.methgt,
            dewtemp: site.dewtemp,
            lag: site.lag,
            reuse: site.reuse_weather,
            doy: site.doy,
            solarhour: site.solarhour,
            nyears: 1,
            a: 0.0,
            b: 0.0,
            decl: 0.0,
            sunrise: 0.0,
            sunset: 0.0,
            daylen: 0.0,
            solarconst: 0.0,
            dayetrad: 0.0,
            dayrad: SolarRad::default(),
            daytmin: 0.0,
            daytmax: 0.0,
            daytmean: 0.0,
            daywind: 0.0,
            dayrain: 0.0,
            solarpos: SolarPos::default(),
            etrad: 0.0,
            rad: SolarRad::default(),
            airtemp: 0.0,
            slopesvp: 0.0,
            svp: 0.0,
            vp: 0.0,
            vpd: 0.0,
            rh: 0.0,
            netrad: 0.0,
            windspd: 0.0,
        };
        met.refresh_daily()?;
        met.set_hour(site.solarhour);
        Ok(met)
    }

    /// The current annual weather table.
    pub fn annual(&self) -> &AnnualWeather {
        self.source.table()
    }

    pub fn source_mut(&mut self) -> &mut dyn WeatherSource {
        self.source.as_mut()
    }

    /// Moves the day of year forward by one, refreshing the annual weather
    /// when the year wraps (unless configured to reuse it).
    pub fn advance_day(&mut self) -> Result<()> {
        let next = doy365(self.doy + 1);
        if next < self.doy {
            if !self.reuse {
                self.source.refresh()?;
            }
            self.nyears += 1;
        }
        self.doy = next;
        self.refresh_daily()
    }

    /// Re-points the model at a day of the current year without advancing the
    /// simulation clock (used by the weather statistics pass).
    pub fn seek_day(&mut self, doy: u32) -> Result<()> {
        self.doy = doy365(doy);
        self.refresh_daily()
    }

    fn refresh_daily(&mut self) -> Result<()> {
        self.decl = self.solar_declination();
        self.a = self.lat.sin() * self.decl.sin();
        self.b = self.lat.cos() * self.decl.cos();
        let (tsr, tss) = self.sunrise_set_hour();
        self.sunrise = tsr;
        self.sunset = tss;
        self.daylen = tss - tsr;
        self.solarconst = self.solar_constant();
        self.dayetrad = self.day_et_radiation();

        let doy0 = (self.doy - 1) as usize;
        let table = self.source.table();
        self.daytmin = table.value("tmin", doy0)?;
        self.daytmax = table.value("tmax", doy0)?;
        self.daywind = table.value("wind", doy0)?;
        self.dayrain = table.value("rain", doy0)?;
        self.daytmean = (self.daytmin + self.daytmax) / 2.0;

        self.dayrad = self.day_radiation()?;
        Ok(())
    }

    /// Sets the local solar hour and recomputes all instantaneous quantities.
    pub fn set_hour(&mut self, hour: f64) {
        self.solarhour = hour.rem_euclid(24.0);
        self.solarpos = self.solar_position();
        self.airtemp = self.air_temperature();
        self.slopesvp = self.slope_svp();
        self.svp = svp_at(self.airtemp);
        self.vp = self.vapor_pressure();
        self.vpd = self.svp - self.vp;
        self.rh = 100.0 * self.vp / self.svp;
        self.etrad = self.et_radiation();
        self.rad = self.radiation();
        self.netrad = self.net_radiation();
        self.windspd = self.wind_speed();
    }

    fn solar_declination(&self) -> f64 {
        -0.4093 * (0.0172 * (self.doy as f64 + 10.0)).cos()
    }

    /// Local solar hours of sunrise and sunset, symmetric about 12.0. The
    /// hour-angle cosine is clamped so polar day and night stay finite.
    fn sunrise_set_hour(&self) -> (f64, f64) {
        let aob = (-self.a / self.b).clamp(-1.0, 1.0);
        let tss = 12.0 + (12.0 / std::f64::consts::PI) * aob.acos();
        (24.0 - tss, tss)
    }

    fn solar_constant(&self) -> f64 {
        1370.0 * (1.0 + 0.033 * (0.0172 * (self.doy as f64 - 10.0)).cos())
    }

    /// Daily extra-terrestrial solar irradiance (MJ/m2/day), closed form.
    fn day_et_radiation(&self) -> f64 {
        let aob = (self.a / self.b).clamp(-1.0, 1.0);
        0.027501974
            * self.solarconst
            * (self.a * (-aob).acos() + self.b * (1.0 - aob * aob).sqrt())
    }

    /// Daily total, direct and diffuse irradiance (MJ/m2/day) by 5-point
    /// quadrature of the instantaneous components over daylight.
    fn day_radiation(&mut self) -> Result<SolarRad> {
        let hour = self.solarhour;
        let (sunrise, sunset) = (self.sunrise, self.sunset);
        let sums = quad::integrate(5, sunrise, sunset, |h| {
            self.set_hour(h);
            Ok([self.rad.total, self.rad.direct, self.rad.diffuse])
        })?;
        self.set_hour(hour); // restore the clock
        let to_mj = 3600.0 / 1.0e6;
        Ok(SolarRad {
            total: sums[0] * to_mj,
            direct: sums[1] * to_mj,
            diffuse: sums[2] * to_mj,
        })
    }

    fn solar_position(&self) -> SolarPos {
        let ha = (std::f64::consts::PI / 12.0) * (self.solarhour - 12.0);
        let cosinc = (self.a + self.b * ha.cos()).clamp(-1.0, 1.0);
        let inc = cosinc.acos().min(std::f64::consts::FRAC_PI_2);
        let hgt = std::f64::consts::FRAC_PI_2 - inc;
        let mut n = self.lat.sin() * hgt.sin() - self.decl.sin();
        n /= self.lat.cos() * hgt.cos();
        let acosa = n.clamp(-1.0, 1.0).acos();
        let azi = if self.solarhour <= 12.0 {
            std::f64::consts::PI - acosa
        } else {
            std::f64::consts::PI + acosa
        };
        SolarPos { inc, hgt, azi }
    }

    fn et_radiation(&self) -> f64 {
        (self.solarconst * self.solarpos.inc.cos()).max(0.0)
    }

    /// Instantaneous total solar irradiance and its direct/diffuse split
    /// (W/m2) through an empirical atmospheric transmittance.
    fn radiation(&self) -> SolarRad {
        if self.etrad <= 0.0 {
            return SolarRad::default();
        }
        let tau = -0.0112 * self.rh + 1.1857;
        // optical air mass, atmospheric pressure taken as 101 kPa
        let m = 101.0 / (101.3 * self.solarpos.inc.cos());
        let kt = tau.powf(m).min(1.0);
        let direct = self.etrad * kt;
        let diffuse = 0.3 * (1.0 - kt) * self.etrad;
        SolarRad {
            total: direct + diffuse,
            direct,
            diffuse,
        }
    }

    /// Instantaneous air temperature (deg C): a sine between tmin and tmax
    /// during the day with the minimum `lag` hours after sunrise, and a
    /// linear relaxation toward tmin outside that window.
    fn air_temperature(&self) -> f64 {
        let lag = self.lag;
        let (tmin, tmax) = (self.daytmin, self.daytmax);
        let (tsr, tss) = (self.sunrise, self.sunset);
        let tset = tmin
            + (tmax - tmin) * (std::f64::consts::PI * (tss - tsr - lag) / self.daylen).sin();
        if self.solarhour < tsr + lag {
            tset + ((tmin - tset) * (self.solarhour + tsr)) / ((tsr + lag) + tsr)
        } else if self.solarhour <= tss {
            let n1 = std::f64::consts::PI * (self.solarhour - tsr - lag) / self.daylen;
            tmin + (tmax - tmin) * n1.sin()
        } else {
            tset + ((tmin - tset) * (self.solarhour - tss)) / ((tsr + lag) + tsr)
        }
    }

    /// Slope of the SVP curve at the current air temperature (mbar/deg C).
    fn slope_svp(&self) -> f64 {
        let n1 = (17.269 * self.airtemp / (self.airtemp + 237.3)).exp();
        let n2 = (self.airtemp + 237.3) * (self.airtemp + 237.3);
        25029.4 * n1 / n2
    }

    fn vapor_pressure(&self) -> f64 {
        svp_at(self.airtemp.min(self.dewtemp))
    }

    /// Net radiation (W/m2): shortwave minus the longwave balance.
    fn net_radiation(&self) -> f64 {
        let albedo = 0.15;
        let stefan_boltzmann = 5.67e-8;
        let tak = self.airtemp + 273.15;
        let rnl =
            0.98 * stefan_boltzmann * tak.powi(4) * (1.31 * (self.vp / tak).powf(1.0 / 7.0) - 1.0);
        (1.0 - albedo) * self.rad.total + rnl
    }

    /// Instantaneous wind speed (m/s): a sine between a pre-sunrise minimum
    /// and an afternoon maximum, both scaled from the daily mean.
    fn wind_speed(&self) -> f64 {
        let uday = self.daywind;
        let umin = 0.559134814 * uday.powf(1.25);
        let umax = 1.797613613 * uday.powf(0.75);
        let udelta = (umax - umin)
            * (std::f64::consts::PI * (self.solarhour - self.sunrise - self.lag) / self.daylen)
                .sin();
        let within = (self.sunrise + self.lag) <= self.solarhour
            && self.solarhour <= (self.sunset + self.lag);
        if within {
            umin + udelta
        } else {
            umin
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::weather::WeatherFile;

    fn file_source(years: usize, tmax_base: f64) -> Box<dyn WeatherSource> {
        let mut s = String::from("*doy,tmin,tmax,wind,rain\n");
        for y in 0..years {
            for d in 1..=365 {
                s.push_str(&format!("{d},22.0,{},1.5,0.0\n", tmax_base + y as f64));
            }
        }
        Box::new(WeatherFile::parse(&s, 365).unwrap())
    }

    fn site(lat: f64, doy: u32) -> SiteConfig {
        SiteConfig {
            lat,
            methgt: 10.0,
            doy,
            solarhour: 12.0,
            dewtemp: 22.0,
            lag: 2.0,
            reuse_weather: false,
        }
    }

    #[test]
    fn test_svp_known_value() {
        assert!((svp_at(25.0) - 31.67).abs() < 0.05);
    }

    #[test]
    fn test_solar_symmetry() {
        for (lat, doy) in [(3.0, 172), (3.0, 355), (45.0, 80), (-30.0, 200)] {
            let met = Meteo::new(site(lat, doy), file_source(1, 32.0)).unwrap();
            assert!(
                (met.sunrise + met.sunset - 24.0).abs() < 1e-9,
                "sunrise/sunset not symmetric at lat {lat}, doy {doy}"
            );
            assert!(met.daylen > 0.0);
        }
    }

    #[test]
    fn test_equator_day_length() {
        let met = Meteo::new(site(0.0, 172), file_source(1, 32.0)).unwrap();
        assert!((met.daylen - 12.0).abs() < 0.01);
    }

    #[test]
    fn test_noon_radiation_positive_midnight_zero() {
        let mut met = Meteo::new(site(3.0, 100), file_source(1, 32.0)).unwrap();
        met.set_hour(12.0);
        assert!(met.rad.total > 0.0);
        assert!(met.rad.direct >= 0.0 && met.rad.diffuse >= 0.0);
        met.set_hour(0.0);
        assert!(met.rad.total.abs() < 1e-9);
        assert!(met.etrad.abs() < 1e-9);
    }

    #[test]
    fn test_air_temperature_within_bounds() {
        let mut met = Meteo::new(site(3.0, 50), file_source(1, 32.0)).unwrap();
        for h in 0..24 {
            met.set_hour(h as f64);
            assert!(met.airtemp >= met.daytmin - 1e-9);
            assert!(met.airtemp <= met.daytmax + 1e-9);
        }
    }

    #[test]
    fn test_doy_wrap_refreshes_weather() {
        let mut met = Meteo::new(site(3.0, 364), file_source(2, 30.0)).unwrap();
        assert!((met.daytmax - 30.0).abs() < 1e-9);
        met.advance_day().unwrap(); // 365
        assert_eq!(met.doy, 365);
        met.advance_day().unwrap(); // wraps to 1, next year block
        assert_eq!(met.doy, 1);
        assert_eq!(met.nyears, 2);
        assert!((met.daytmax - 31.0).abs() < 1e-9);
    }

    #[test]
    fn test_reuse_keeps_same_year() {
        let mut cfg = site(3.0, 365);
        cfg.reuse_weather = true;
        let mut met = Meteo::new(cfg, file_source(2, 30.0)).unwrap();
        met.advance_day().unwrap();
        assert_eq!(met.doy, 1);
        assert!((met.daytmax - 30.0).abs() < 1e-9, "reuse must not refresh");
    }

    #[test]
    fn test_humidity_consistency() {
        let mut met = Meteo::new(site(3.0, 120), file_source(1, 33.0)).unwrap();
        met.set_hour(14.0);
        assert!((met.vpd - (met.svp - met.vp)).abs() < 1e-12);
        assert!(met.rh > 0.0 && met.rh <= 100.0);
    }
}
