use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Gamma};

use super::{month_of_doy, AnnualWeather, WeatherSource};

/// Rain generation parameters, one entry per month.
#[derive(Debug, Clone)]
pub struct RainParams {
    /// Probability of a wet day following a wet day.
    pub pww: [f64; 12],
    /// Probability of a wet day following a dry day.
    pub pwd: [f64; 12],
    /// Gamma shape of daily rain amounts.
    pub shape: [f64; 12],
    /// Gamma scale of daily rain amounts (mm).
    pub scale: [f64; 12],
}

/// Air temperature generation parameters (annual, not monthly).
#[derive(Debug, Clone, Copy)]
pub struct TempParams {
    /// Annual mean (deg C).
    pub mean: f64,
    /// Seasonal amplitude around the mean (deg C).
    pub amp: f64,
    /// Coefficient of variation.
    pub cv: f64,
    /// Seasonal amplitude of the cv.
    pub ampcv: f64,
    /// Mean on wet days (deg C).
    pub meanwet: f64,
}

/// Wind generation parameters, one entry per month.
#[derive(Debug, Clone)]
pub struct WindParams {
    pub shape: [f64; 12],
    pub scale: [f64; 12],
}

#[derive(Debug, Clone)]
pub struct GeneratorParams {
    pub rain: RainParams,
    pub tmax: TempParams,
    pub tmin: TempParams,
    pub wind: WindParams,
}

/// Tiles or truncates a per-month parameter list to exactly 12 entries.
pub fn fill_months(values: &[f64]) -> Result<[f64; 12]> {
    anyhow::ensure!(!values.is_empty(), "monthly parameter list is empty");
    let mut out = [0.0; 12];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = values[i % values.len()];
    }
    Ok(out)
}

// Cross-correlation matrices of the daily temperature error process
// (Richardson's WGEN coefficients, as used by the source model).
const A: [[f64; 3]; 3] = [
    [0.567, 0.086, -0.002],
    [0.253, 0.504, -0.050],
    [-0.006, -0.039, 0.244],
];
const B: [[f64; 3]; 3] = [
    [0.781, 0.000, 0.000],
    [0.328, 0.637, 0.000],
    [0.238, -0.341, 0.873],
];

/// Stochastic daily weather generator: Markov-chain rain occurrence with
/// gamma amounts, cross-correlated min/max temperature, Weibull wind.
pub struct WeatherGenerator {
    params: GeneratorParams,
    table: AnnualWeather,
    rng: StdRng,
    xim1: [f64; 3],
    is_rain: bool,
}

impl WeatherGenerator {
    pub fn new(params: GeneratorParams, mut rng: StdRng) -> Result<Self> {
        let is_rain = rng.gen_bool(0.5);
        let mut gen = Self {
            params,
            table: AnnualWeather::new(365, &["tmin", "tmax", "wind", "rain"]),
            rng,
            xim1: [0.0; 3],
            is_rain,
        };
        gen.generate_year()?;
        Ok(gen)
    }

    /// A standard normal deviate rejected outside |v| <= 2.5 (Box-Muller).
    fn bounded_normal(&mut self) -> f64 {
        loop {
            let rn1: f64 = self.rng.gen::<f64>().max(f64::MIN_POSITIVE);
            let rn2: f64 = self.rng.gen();
            let v = (-2.0 * rn1.ln()).sqrt() * (2.0 * std::f64::consts::PI * rn2).cos();
            if v.abs() <= 2.5 {
                return v;
            }
        }
    }

    fn generate_rain(&mut self, month: usize) -> Result<f64> {
        let shape = self.params.rain.shape[month];
        let scale = self.params.rain.scale[month];
        let gamma = Gamma::new(shape, scale)
            .with_context(|| format!("invalid gamma parameters for month {month}"))?;
        let rain: f64 = gamma.sample(&mut self.rng);
        self.is_rain = rain > 0.0;
        Ok(rain)
    }

    fn generate_temperature(&mut self, day: usize, tmax_out: &mut f64, tmin_out: &mut f64) {
        let dt = (0.0172 * (day as f64 + 1.0 - 200.0)).cos();
        let ptmax = self.params.tmax;
        let ptmin = self.params.tmin;

        let txm = ptmax.mean + ptmax.amp * dt;
        let mut xcr1 = ptmax.cv + ptmax.ampcv * dt;
        if xcr1 < 0.0 {
            xcr1 = 0.06;
        }
        let (txxm, txxs) = if self.is_rain {
            let txm1 = txm - (ptmax.mean - ptmax.meanwet);
            (txm1, txm1 * xcr1)
        } else {
            (txm, txm * xcr1)
        };
        let tnm = ptmin.mean + ptmin.amp * dt;
        let mut xcr2 = ptmin.cv + ptmin.ampcv * dt;
        if xcr2 < 0.0 {
            xcr2 = 0.06;
        }
        let tns = tnm * xcr2;

        let e = [
            self.bounded_normal(),
            self.bounded_normal(),
            self.bounded_normal(),
        ];
        let mut x = [0.0; 3];
        for i in 0..3 {
            let mut r = 0.0;
            let mut rr = 0.0;
            for j in 0..3 {
                r += B[i][j] * e[j];
                rr += A[i][j] * self.xim1[j];
            }
            x[i] = r + rr;
        }
        self.xim1 = x;

        let mut tmax = x[0] * txxs + txxm;
        let mut tmin = x[1] * tns + tnm;
        if tmin > tmax {
            std::mem::swap(&mut tmin, &mut tmax);
        }
        *tmax_out = tmax;
        *tmin_out = tmin;
    }

    fn generate_wind(&mut self, month: usize) -> f64 {
        let shape = self.params.wind.shape[month];
        let scale = self.params.wind.scale[month];
        loop {
            // inverse Weibull CDF; redraw below the lowest recorded mean
            // daily wind speed (0.2 m/s)
            let u: f64 = self.rng.gen::<f64>().max(f64::MIN_POSITIVE);
            let w = scale * (-u.ln()).powf(1.0 / shape);
            if w >= 0.2 {
                return w;
            }
        }
    }

    fn generate_year(&mut self) -> Result<()> {
        for day in 0..365 {
            let month = month_of_doy(day as u32 + 1);
            let rn: f64 = self.rng.gen();
            let p_wet = if self.is_rain {
                self.params.rain.pww[month]
            } else {
                self.params.rain.pwd[month]
            };
            let rain = if rn <= p_wet {
                self.generate_rain(month)?
            } else {
                self.is_rain = false;
                0.0
            };
            self.table.set_value("rain", day, rain)?;

            let (mut tmax, mut tmin) = (0.0, 0.0);
            self.generate_temperature(day, &mut tmax, &mut tmin);
            self.table.set_value("tmax", day, tmax)?;
            self.table.set_value("tmin", day, tmin)?;

            let wind = self.generate_wind(month);
            self.table.set_value("wind", day, wind)?;
        }
        Ok(())
    }
}

impl WeatherSource for WeatherGenerator {
    fn table(&self) -> &AnnualWeather {
        &self.table
    }

    fn refresh(&mut self) -> Result<()> {
        self.generate_year()
    }

    fn refresh_year(&mut self, _year: usize) -> Result<()> {
        self.generate_year()
    }

    fn total_years(&self) -> usize {
        1
    }
}
