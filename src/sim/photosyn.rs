use anyhow::Result;
use serde::Serialize;

use super::meteo::{svp_at, Meteo};
use crate::quad;

/// Canopy extinction coefficients.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Extinction {
    /// For direct irradiance (depends on solar elevation).
    pub kdr: f64,
    /// For diffuse irradiance (integrated over the sky, fixed within a day).
    pub kdf: f64,
}

/// PAR reflection coefficients.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Reflect {
    pub pdr: f64,
    pub pdf: f64,
}

/// Leaf area index components (m2 leaf/m2 ground).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LaiComponents {
    pub total: f64,
    pub sunlit: f64,
    pub shaded: f64,
}

/// PAR components (umol photons/m2/s).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Par {
    /// Direct component outside the canopy.
    pub outdr: f64,
    /// Diffuse component outside the canopy.
    pub outdf: f64,
    /// Direct plus scatter within the canopy.
    pub indrscatter: f64,
    /// Direct component within the canopy.
    pub indr: f64,
    /// Scatter component within the canopy.
    pub inscatter: f64,
    /// Diffuse component within the canopy.
    pub indf: f64,
    /// Absorbed by sunlit leaves.
    pub abssunlit: f64,
    /// Absorbed by shaded leaves.
    pub absshaded: f64,
}

/// Temperature-dependent assimilation coefficients.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AssimCoef {
    /// Michaelis-Menten constant for CO2 (umol/mol).
    pub mmco2: f64,
    /// Michaelis-Menten constant for O2 (umol/mol).
    pub mmo2: f64,
    /// CO2/O2 specificity factor.
    pub specificity: f64,
    /// Rubisco maximum capacity (umol CO2/m2 leaf/s).
    pub vcmax: f64,
    /// CO2 compensation point (umol/mol).
    pub co2pt: f64,
}

/// Leaf CO2 assimilation components (umol CO2/m2 leaf/s).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LeafAssim {
    /// Rubisco-limited rate.
    pub vc: f64,
    /// Light-limited rate, sunlit leaves.
    pub vqsl: f64,
    /// Light-limited rate, shaded leaves.
    pub vqsh: f64,
    /// Sink-limited rate.
    pub vs: f64,
    pub sunlit: f64,
    pub shaded: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct PhotosynConfig {
    /// Ambient CO2 (umol/mol) if positive; a calendar year if negative, from
    /// which the concentration is taken off the fitted historical trend.
    pub co2ambient: f64,
    /// Annual change in ambient CO2 (umol/mol/year).
    pub co2change: f64,
    /// Quantum yield (umol CO2/umol photons).
    pub quantum_yield: f64,
    /// Canopy clump factor.
    pub clump: f64,
}

/// Leaf and canopy CO2 assimilation.
#[derive(Serialize)]
pub struct Photosyn {
    pub co2ambient: f64,
    co2change: f64,
    parscatter: f64,
    parabsorb: f64,
    parsoil: f64,
    pub quantum_yield: f64,
    pub clump: f64,
    pub o2ambient: f64,
    pub co2internal: f64,
    pub extcoef: Extinction,
    /// Canopy gap fraction seen from the zenith (1 = fully open).
    pub gap: f64,
    pub refcoef: Reflect,
    pub laicomp: LaiComponents,
    pub par: Par,
    pub assimcoef: AssimCoef,
    pub leafassim: LeafAssim,
    /// Instantaneous canopy assimilation (umol CO2/m2 ground/s).
    pub canopyassim: f64,
    /// Daily canopy assimilation (kg CH2O/palm/day).
    pub dayassim: f64,
}

impl Photosyn {
    pub fn new(cfg: &PhotosynConfig) -> Result<Self> {
        let co2ambient = if cfg.co2ambient > 0.0 {
            cfg.co2ambient
        } else {
            Self::ambient_co2(-cfg.co2ambient)
        };
        anyhow::ensure!(
            cfg.clump > 0.0,
            "canopy clump factor must be positive, got {}",
            cfg.clump
        );
        Ok(Self {
            co2ambient,
            co2change: cfg.co2change,
            parscatter: 0.8,
            parabsorb: 0.8,
            parsoil: 0.15,
            quantum_yield: cfg.quantum_yield,
            clump: cfg.clump,
            o2ambient: 210_000.0,
            co2internal: 0.7 * co2ambient,
            extcoef: Extinction { kdr: 0.5, kdf: 0.5 },
            gap: 1.0,
            refcoef: Reflect { pdr: 0.04, pdf: 0.04 },
            laicomp: LaiComponents::default(),
            par: Par::default(),
            assimcoef: AssimCoef {
                mmco2: 270.0,
                mmo2: 165_000.0,
                specificity: 2800.0,
                vcmax: 100.0,
                co2pt: 35.0,
            },
            leafassim: LeafAssim::default(),
            canopyassim: 0.0,
            dayassim: 0.0,
        })
    }

    /// Mean annual ambient CO2 (umol/mol) for a given year, from a quadratic
    /// fitted to the historical trend (linear in the square).
    pub fn ambient_co2(year: f64) -> f64 {
        let (a, b, c) = (39_413_600.0, -40_620.109_6, 10.490_94);
        (a + b * year + c * year * year).sqrt()
    }

    /// Day-of-year hook: the ambient CO2 drifts by the annual change.
    pub fn on_new_day(&mut self) {
        self.co2ambient += self.co2change / 365.0;
    }

    /// Freezes the within-day constants: the diffuse extinction coefficient,
    /// integrated over the sky by quadrature of Beer-law transmission.
    pub fn set_daily(&mut self, lai: f64) -> Result<()> {
        self.extcoef.kdf = self.diffuse_extinction(lai)?;
        Ok(())
    }

    fn diffuse_extinction(&self, lai: f64) -> Result<f64> {
        let x = self.clump * lai;
        if x < 1e-6 {
            return Ok(0.5);
        }
        // transmission of a uniform-overcast sky through the canopy
        let tau = quad::integrate(5, 0.0, std::f64::consts::FRAC_PI_2, |inc| {
            let kdr = (0.5 / inc.cos()).min(10.0);
            Ok([(-kdr * x).exp() * 2.0 * inc.sin() * inc.cos()])
        })?[0];
        Ok(-tau.max(1e-12).ln() / x)
    }

    /// Canopy geometry and PAR decomposition at the current solar hour.
    pub fn update_hour(&mut self, met: &Meteo, lai: f64) {
        self.extcoef.kdr = (0.5 / met.solarpos.inc.cos()).min(10.0);
        self.gap = (-self.extcoef.kdr * self.clump * lai).exp();
        self.refcoef = self.reflection_coef(lai);
        self.laicomp = self.lai_components(lai);
        self.par = self.par_components(met, lai);
    }

    fn reflection_coef(&self, lai: f64) -> Reflect {
        let a = self.parscatter.sqrt() * lai;
        Reflect {
            pdr: (self.parsoil * (-2.0 * self.extcoef.kdr * self.clump * a).exp()).max(0.04),
            pdf: (self.parsoil * (-2.0 * self.extcoef.kdf * a).exp()).max(0.04),
        }
    }

    fn lai_components(&self, lai: f64) -> LaiComponents {
        let a = self.extcoef.kdr * self.clump;
        let sunlit = (1.0 - (-a * lai).exp()) / a;
        LaiComponents {
            total: lai,
            sunlit,
            shaded: lai - sunlit,
        }
    }

    /// Goudriaan decomposition of PAR outside and within the canopy, and the
    /// amounts absorbed by the sunlit and shaded leaf classes.
    fn par_components(&self, met: &Meteo, lai: f64) -> Par {
        // 50% of solar radiation is PAR; 1 W/m2 = 4.55 umol photons/m2/s
        let qdr = met.rad.direct * 0.5 * 4.55;
        let qdf = met.rad.diffuse * 0.5 * 4.55;
        let a = self.extcoef.kdr * self.clump * lai;
        let b = self.parscatter.sqrt();
        let indrscatter = (1.0 - self.refcoef.pdr) * qdr * (-a * b).exp();
        let indr = (1.0 - self.refcoef.pdr) * qdr * (-a).exp();
        let inscatter = 0.5 * (indrscatter - indr);
        let adf = self.extcoef.kdf * b * lai;
        let indf = if adf > 1e-9 {
            (1.0 - self.refcoef.pdf) * qdf * (1.0 - (-adf).exp()) / adf
        } else {
            (1.0 - self.refcoef.pdf) * qdf
        };
        let abssunlit =
            self.parabsorb * (self.extcoef.kdr * self.clump * qdr + indf + inscatter);
        let absshaded = self.parabsorb * (indf + inscatter);
        Par {
            outdr: qdr,
            outdf: qdf,
            indrscatter,
            indr,
            inscatter,
            indf,
            abssunlit,
            absshaded,
        }
    }

    /// Temperature-dependent assimilation coefficients at the given canopy
    /// temperature (Q10 forms; Vcmax declines with age and cuts off above
    /// 40 deg C).
    fn assim_coefs(&self, canopytemp: f64, treeage: u32) -> AssimCoef {
        let q10 = |val25: f64, q: f64| val25 * q.powf((canopytemp - 25.0) / 10.0);
        let vcmax25 = 87.935 - 0.0026 * treeage as f64;
        let mmco2 = q10(270.0, 2.786);
        let mmo2 = q10(165_000.0, 1.355);
        let specificity = q10(2800.0, 0.703);
        let mut vcmax = q10(vcmax25, 2.573);
        vcmax /= 1.0 + (0.29 * (canopytemp - 40.0)).exp();
        let co2pt = 0.5 * self.o2ambient / specificity;
        AssimCoef {
            mmco2,
            mmo2,
            specificity,
            vcmax,
            co2pt,
        }
    }

    /// Intercellular CO2 (umol/mol) from ambient CO2 and leaf VPD.
    fn internal_co2(&self, canopytemp: f64, met: &Meteo) -> f64 {
        // beyond 65 mbar leaf VPD the stomata close fully in oil palm
        let vpdleaf = (svp_at(canopytemp) - met.vp).min(65.0);
        let (a, b) = (0.0615, 0.0213);
        let ca = self.co2ambient;
        ca * (1.0 - (1.0 - self.assimcoef.co2pt / ca) * (a + b * vpdleaf))
    }

    fn leaf_assimilation(&self) -> LeafAssim {
        let co2diff = (self.co2internal - self.assimcoef.co2pt).max(0.0);
        let n = 1.0 + self.o2ambient / self.assimcoef.mmo2;
        let vc = self.assimcoef.vcmax * co2diff / (self.assimcoef.mmco2 * n + self.co2internal);
        let a = co2diff / (self.co2internal + 2.0 * self.assimcoef.co2pt)
            * self.quantum_yield
            * self.parabsorb;
        let vqsl = self.par.abssunlit * a;
        let vqsh = self.par.absshaded * a;
        let vs = self.assimcoef.vcmax * 0.5;
        LeafAssim {
            vc,
            vqsl,
            vqsh,
            vs,
            sunlit: vc.min(vqsl).min(vs),
            shaded: vc.min(vqsh).min(vs),
        }
    }

    /// Instantaneous canopy assimilation at the given canopy temperature.
    /// [`Photosyn::update_hour`] must have run for the current hour.
    pub fn assimilate(&mut self, canopytemp: f64, met: &Meteo, treeage: u32) {
        self.assimcoef = self.assim_coefs(canopytemp, treeage);
        self.co2internal = self.internal_co2(canopytemp, met);
        self.leafassim = self.leaf_assimilation();
        self.canopyassim = self.leafassim.sunlit * self.laicomp.sunlit
            + self.leafassim.shaded * self.laicomp.shaded;
    }

    /// Stores the daily canopy assimilation from its daylight integral
    /// (umol CO2/m2/s integrated over hours), as kg CH2O per palm per day.
    pub fn set_daily_assim(&mut self, daylight_integral: f64, plantdens: f64) {
        self.dayassim = daylight_integral * 1.08 / plantdens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::meteo::SiteConfig;
    use crate::sim::weather::{WeatherFile, WeatherSource};

    fn met() -> Meteo {
        let mut s = String::from("*doy,tmin,tmax,wind,rain\n");
        for d in 1..=365 {
            s.push_str(&format!("{d},22.0,32.0,1.5,0.0\n"));
        }
        let source: Box<dyn WeatherSource> = Box::new(WeatherFile::parse(&s, 365).unwrap());
        let site = SiteConfig {
            lat: 3.0,
            methgt: 10.0,
            doy: 100,
            solarhour: 12.0,
            dewtemp: 22.0,
            lag: 2.0,
            reuse_weather: true,
        };
        Meteo::new(site, source).unwrap()
    }

    fn photosyn() -> Photosyn {
        Photosyn::new(&PhotosynConfig {
            co2ambient: 400.0,
            co2change: 0.0,
            quantum_yield: 0.051,
            clump: 1.0,
        })
        .unwrap()
    }

    #[test]
    fn test_ambient_co2_trend() {
        let c2000 = Photosyn::ambient_co2(2000.0);
        assert!((c2000 - 370.0).abs() < 5.0, "got {c2000}");
        assert!(Photosyn::ambient_co2(2020.0) > c2000);
    }

    #[test]
    fn test_lai_partition() {
        let mut p = photosyn();
        let m = met();
        for lai in [0.5, 2.0, 4.5, 6.0] {
            p.set_daily(lai).unwrap();
            p.update_hour(&m, lai);
            let lc = p.laicomp;
            assert!((lc.total - (lc.sunlit + lc.shaded)).abs() < 1e-9);
            assert!(lc.sunlit > 0.0 && lc.shaded >= 0.0);
        }
    }

    #[test]
    fn test_assimilation_positive_under_light() {
        let mut p = photosyn();
        let m = met();
        p.set_daily(3.0).unwrap();
        p.update_hour(&m, 3.0);
        p.assimilate(30.0, &m, 3650);
        assert!(p.canopyassim > 0.0);
        assert!(p.leafassim.sunlit >= p.leafassim.shaded);
        assert!(p.leafassim.vs > 0.0);
    }

    #[test]
    fn test_zero_lai_zero_assimilation() {
        let mut p = photosyn();
        let m = met();
        p.set_daily(0.0).unwrap();
        p.update_hour(&m, 0.0);
        p.assimilate(30.0, &m, 3650);
        assert!((p.gap - 1.0).abs() < 1e-12, "no canopy means full gap");
        assert!(p.canopyassim.abs() < 1e-12);
    }

    #[test]
    fn test_co2_doubling_raises_assimilation() {
        let m = met();
        let mut low = photosyn();
        low.set_daily(3.0).unwrap();
        low.update_hour(&m, 3.0);
        low.assimilate(30.0, &m, 3650);

        let mut high = Photosyn::new(&PhotosynConfig {
            co2ambient: 800.0,
            co2change: 0.0,
            quantum_yield: 0.051,
            clump: 1.0,
        })
        .unwrap();
        high.set_daily(3.0).unwrap();
        high.update_hour(&m, 3.0);
        high.assimilate(30.0, &m, 3650);

        let gain = high.canopyassim / low.canopyassim - 1.0;
        assert!(gain > 0.10 && gain < 0.70, "CO2 doubling gain was {gain}");
    }

    #[test]
    fn test_diffuse_extinction_reasonable() {
        let p = photosyn();
        for lai in [0.5, 2.0, 5.0] {
            let kdf = p.diffuse_extinction(lai).unwrap();
            assert!(kdf > 0.4 && kdf < 1.5, "kdf {kdf} at lai {lai}");
        }
        assert!((p.diffuse_extinction(0.0).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_negative_config_co2_means_year() {
        let p = Photosyn::new(&PhotosynConfig {
            co2ambient: -2000.0,
            co2change: 0.0,
            quantum_yield: 0.051,
            clump: 1.0,
        })
        .unwrap();
        assert!((p.co2ambient - Photosyn::ambient_co2(2000.0)).abs() < 1e-9);
    }
}
