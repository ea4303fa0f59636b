use anyhow::Result;
use serde::Serialize;

use super::meteo::Meteo;
use super::photosyn::Photosyn;
use super::soil::SoilWater;

/// Psychrometric constant (mbar/K).
const PSYCHO: f64 = 0.658;
/// Volumetric heat capacity of air (J/m3/K).
const PCP: f64 = 1221.09;
/// Soil roughness length for flat, tilled land (m).
const SOIL_ROUGHLEN: f64 = 0.004;
/// von Karman constant.
const VONK: f64 = 0.4;
/// Maximum stomatal conductance (m/s), about 500 mmol/m2/s.
const GST_MAX: f64 = 0.0125;

/// Mean leaflet dimensions (m).
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LeafDim {
    pub length: f64,
    pub width: f64,
}

/// Multiplicative reductions to stomatal conductance, each in [0, 1].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StomatalStress {
    pub water: f64,
    pub vpd: f64,
    pub par: f64,
}

/// Net radiation partitioned between crop and soil (W/m2).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AvailEnergy {
    pub total: f64,
    pub crop: f64,
    pub soil: f64,
    pub net: f64,
    /// Soil heat flux.
    pub g: f64,
}

/// The six resistances of the transport network (s/m).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Resistances {
    /// Soil to mean canopy flow.
    pub rsa: f64,
    /// Mean canopy flow to reference height.
    pub raa: f64,
    /// Leaf boundary layer.
    pub rca: f64,
    /// Leaf stomatal.
    pub rst: f64,
    /// Canopy (stomatal, bulked over the effective LAI).
    pub rcs: f64,
    /// Soil surface.
    pub rss: f64,
}

/// Heat flux components (W/m2 instantaneous; mm/day or MJ/m2/day daily).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HeatFlux {
    pub total: f64,
    pub crop: f64,
    pub soil: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct EnergyConfig {
    /// Reference height (m); must stay above the trees.
    pub refhgt: f64,
    /// Wind extinction coefficient through the canopy.
    pub windext: f64,
    /// Eddy diffusivity extinction coefficient.
    pub eddyext: f64,
    /// Zero-plane displacement as a fraction of tree height.
    pub dcoef: f64,
    /// Roughness length as a fraction of tree height.
    pub z0coef: f64,
    /// Mean leaflet length (m).
    pub leaflength: f64,
    /// Mean leaflet width (m).
    pub leafwidth: f64,
}

/// Energy fluxes in the soil-plant-atmosphere system, modelled as an
/// electrical network: latent and sensible heat from the canopy and soil
/// sources traverse the six resistances to the reference height. The solve
/// also recovers the canopy temperature that closes the budget.
#[derive(Serialize)]
pub struct EnergyBal {
    refhgt: f64,
    pub windext: f64,
    pub eddyext: f64,
    dcoef: f64,
    z0coef: f64,
    /// Zero-plane displacement (m), frozen daily.
    pub d: f64,
    /// Crop roughness length (m), frozen daily.
    pub z0: f64,
    pub leafdim: LeafDim,
    pub stressfn: StomatalStress,
    pub availegy: AvailEnergy,
    /// Friction velocity (m/s).
    pub ustar: f64,
    /// Wind speed at tree height (m/s).
    pub ucrophgt: f64,
    pub res: Resistances,
    /// Latent heat fluxes (W/m2).
    pub et: HeatFlux,
    /// Sensible heat fluxes (W/m2).
    pub h: HeatFlux,
    /// Canopy temperature (deg C).
    pub canopytemp: f64,
    /// Daily latent heat (mm water/day).
    pub dayet: HeatFlux,
    /// Daily sensible heat (MJ/m2/day).
    pub dayh: HeatFlux,
}

impl EnergyBal {
    pub fn new(cfg: &EnergyConfig) -> Result<Self> {
        anyhow::ensure!(cfg.refhgt > 0.0, "reference height must be positive");
        anyhow::ensure!(
            cfg.leaflength > 0.0 && cfg.leafwidth > 0.0,
            "leaflet dimensions must be positive"
        );
        Ok(Self {
            refhgt: cfg.refhgt,
            windext: cfg.windext,
            eddyext: cfg.eddyext,
            dcoef: cfg.dcoef,
            z0coef: cfg.z0coef,
            d: 0.0,
            z0: 0.0,
            leafdim: LeafDim {
                length: cfg.leaflength,
                width: cfg.leafwidth,
            },
            stressfn: StomatalStress {
                water: 1.0,
                vpd: 1.0,
                par: 1.0,
            },
            availegy: AvailEnergy::default(),
            ustar: 0.0,
            ucrophgt: 0.0,
            res: Resistances::default(),
            et: HeatFlux::default(),
            h: HeatFlux::default(),
            canopytemp: 25.0,
            dayet: HeatFlux::default(),
            dayh: HeatFlux::default(),
        })
    }

    /// Freezes the wind-profile parameters that stay constant within a day.
    pub fn set_daily_immutables(&mut self, treehgt: f64) {
        self.d = self.dcoef * treehgt;
        self.z0 = self.z0coef * treehgt;
    }

    fn stomatal_stresses(&self, met: &Meteo, soil: &SoilWater) -> StomatalStress {
        // conductance declines with VPD
        let gst_vpd = |vpd: f64| -0.007516 * vpd.ln() + 0.031970;
        let vpd_min = gst_vpd(65.0);
        let vpd_max = gst_vpd(10.0);
        let vpd = gst_vpd(met.vpd.max(10.0)).clamp(vpd_min, vpd_max) / vpd_max;

        // conductance rises with PAR toward saturation
        let gst_par = |par: f64| 0.014614 * (1.0 - (-0.008740 * par).exp());
        let par_min = gst_par(0.1);
        let par_max = gst_par(330.0);
        let partotal = met.rad.total * 0.5;
        let par = gst_par(partotal).clamp(par_min, par_max) / par_max;

        StomatalStress {
            water: soil.stresses.crop,
            vpd,
            par,
        }
    }

    /// Net radiation split between crop and soil by Beer's law, with the
    /// soil heat flux G as a cover-dependent fraction.
    fn available_energy(&self, met: &Meteo, photo: &Photosyn, lai: f64) -> AvailEnergy {
        let tc = 0.05; // fraction of Rn into G under full canopy
        let ts = 0.315; // and for bare soil
        let pfn = (-photo.extcoef.kdr * photo.clump * 0.5_f64.sqrt() * lai).exp();
        let gap = photo.gap.max(pfn);
        let rn = met.netrad;
        let crop = (1.0 - gap) * (1.0 - tc) * rn;
        let soil = gap * (1.0 - ts) * rn;
        AvailEnergy {
            total: crop + soil,
            crop,
            soil,
            net: rn,
            g: (tc + gap * (ts - tc)) * rn,
        }
    }

    /// Wind speed extrapolated from station height to the reference height
    /// by the log law over open terrain.
    fn windspd_at_refhgt(&self, met: &Meteo) -> f64 {
        let z0_open = 0.03;
        // calm floor keeps the log-profile arithmetic finite
        let ws = met.windspd.max(0.05);
        ws * (self.refhgt / z0_open).ln() / (met.methgt / z0_open).ln()
    }

    fn friction_velocity(&self, met: &Meteo, treehgt: f64) -> Result<f64> {
        anyhow::ensure!(
            self.refhgt >= treehgt,
            "tree height {treehgt:.2} m exceeds reference height {:.2} m at (doy {}, hour {:.2})",
            self.refhgt,
            met.doy,
            met.solarhour
        );
        let windspd = self.windspd_at_refhgt(met);
        Ok(VONK * windspd / ((self.refhgt - self.d) / self.z0).ln())
    }

    fn windspd_at_crophgt(&self, treehgt: f64) -> f64 {
        (self.ustar / VONK) * ((treehgt - self.d) / self.z0).ln()
    }

    /// Soil surface resistance from the water status of the top layer.
    fn res_rss(&self, soil: &SoilWater) -> f64 {
        let top = &soil.layers[0];
        let tau = (top.swc.porosity + 3.79 * (1.0 - top.swc.porosity)).sqrt();
        let dmv = 24.7e-6; // vapor diffusion coefficient (m2/s)
        let rssmax = tau * top.thick / (top.swc.porosity * dmv);
        rssmax * (-top.vwc / (top.swc.psd * top.swc.sat)).exp()
    }

    fn res_rsa(&self, treehgt: f64) -> f64 {
        let n = self.eddyext;
        let a = n.exp() / (n * VONK * self.ustar);
        let b = (-n * SOIL_ROUGHLEN / treehgt).exp();
        let c = (-n * (self.z0 + self.d) / treehgt).exp();
        a * (b - c)
    }

    fn res_raa(&self, treehgt: f64) -> f64 {
        let n = self.eddyext;
        let a = VONK * self.ustar;
        let b = ((self.refhgt - self.d) / (treehgt - self.d)).ln() / a;
        let c = 1.0 - (self.z0 + self.d) / treehgt;
        b + ((n * c).exp() - 1.0) / (n * a)
    }

    fn effective_lai(&self, lai: f64, laimax: f64) -> f64 {
        lai.min(0.5 * laimax)
    }

    fn res_rca(&self, lai: f64, laimax: f64) -> f64 {
        let n = self.windext;
        let a = (1.0 - (-n / 2.0).exp()) * (self.ucrophgt / self.leafdim.width).sqrt();
        n / (0.01 * self.effective_lai(lai, laimax).max(1e-9) * a)
    }

    fn res_rcs_st(&self, lai: f64, laimax: f64) -> (f64, f64) {
        let stress = (self.stressfn.water * self.stressfn.vpd * self.stressfn.par).max(1e-9);
        let gst = GST_MAX * stress;
        let gcs = gst * self.effective_lai(lai, laimax).max(1e-9);
        (1.0 / gst, 1.0 / gcs)
    }

    /// Shuttleworth-Wallace two-source solve for the latent and sensible
    /// heat fluxes (W/m2).
    fn solve_fluxes(&self, met: &Meteo) -> (HeatFlux, HeatFlux) {
        let slope = met.slopesvp;
        let vpd = met.vpd;
        let (raa, rca, rsa, rcs, rss) = (
            self.res.raa,
            self.res.rca,
            self.res.rsa,
            self.res.rcs,
            self.res.rss,
        );
        let (atotal, acrop, asoil) = (
            self.availegy.total,
            self.availegy.crop,
            self.availegy.soil,
        );

        let ra = (slope + PSYCHO) * raa;
        let rc = (slope + PSYCHO) * rca + PSYCHO * rcs;
        let rs = (slope + PSYCHO) * rsa + PSYCHO * rss;
        let cc = 1.0 / (1.0 + rc * ra / (rs * (rc + ra)));
        let cs = 1.0 / (1.0 + rs * ra / (rc * (rs + ra)));
        let pmc = (slope * atotal + (PCP * vpd - slope * rca * asoil) / (raa + rca))
            / (slope + PSYCHO * (1.0 + rcs / (raa + rca)));
        let pms = (slope * atotal + (PCP * vpd - slope * rsa * acrop) / (raa + rsa))
            / (slope + PSYCHO * (1.0 + rss / (raa + rsa)));
        let et = cc * pmc + cs * pms;

        // vapor pressure deficit at the mean canopy flow
        let vpd0 = vpd + (raa / PCP) * (slope * atotal - (slope + PSYCHO) * et);
        let etc = (slope * acrop + PCP * vpd0 / rca)
            / (slope + PSYCHO * (rcs + rca) / rca);
        let ets = (slope * asoil + PCP * vpd0 / rsa)
            / (slope + PSYCHO * (rss + rsa) / rsa);
        let hc = (PSYCHO * acrop * (rcs + rca) - PCP * vpd0)
            / (slope * rca + PSYCHO * (rcs + rca));
        let hs = (PSYCHO * asoil * (rss + rsa) - PCP * vpd0)
            / (slope * rsa + PSYCHO * (rss + rsa));

        (
            HeatFlux {
                total: etc + ets,
                crop: etc,
                soil: ets,
            },
            HeatFlux {
                total: hc + hs,
                crop: hc,
                soil: hs,
            },
        )
    }

    /// Canopy temperature recovered from the sensible-heat path, clamped to
    /// a plausible band around air temperature.
    fn canopy_temperature(&self, met: &Meteo) -> f64 {
        let delta = self.h.crop * self.res.rca + (self.h.soil + self.h.crop) * self.res.raa;
        (met.airtemp + delta / PCP).clamp(met.airtemp - 15.0, met.airtemp + 15.0)
    }

    /// Computes all instantaneous heat fluxes and the canopy temperature for
    /// the current solar hour. [`Photosyn::update_hour`] must already have
    /// refreshed the canopy geometry.
    pub fn instant_fluxes(
        &mut self,
        met: &Meteo,
        soil: &SoilWater,
        photo: &Photosyn,
        lai: f64,
        laimax: f64,
        treehgt: f64,
    ) -> Result<()> {
        self.stressfn = self.stomatal_stresses(met, soil);
        self.availegy = self.available_energy(met, photo, lai);
        self.ustar = self.friction_velocity(met, treehgt)?;
        self.ucrophgt = self.windspd_at_crophgt(treehgt);

        let rss = self.res_rss(soil);
        let rsa = self.res_rsa(treehgt);
        let raa = self.res_raa(treehgt);

        if lai < 1e-6 {
            // no canopy: zero crop fluxes, soil at the Penman-Monteith
            // reference, foliage temperature pinned to air temperature
            let big = 1e6;
            self.res = Resistances {
                rsa,
                raa,
                rca: big,
                rst: big,
                rcs: big,
                rss,
            };
            let slope = met.slopesvp;
            let ets = (slope * self.availegy.soil + PCP * met.vpd / (raa + rsa))
                / (slope + PSYCHO * (1.0 + rss / (raa + rsa)));
            let hs = self.availegy.soil - ets;
            self.et = HeatFlux {
                total: ets,
                crop: 0.0,
                soil: ets,
            };
            self.h = HeatFlux {
                total: hs,
                crop: 0.0,
                soil: hs,
            };
            self.canopytemp = met.airtemp;
            return Ok(());
        }

        let rca = self.res_rca(lai, laimax);
        let (rst, rcs) = self.res_rcs_st(lai, laimax);
        self.res = Resistances {
            rsa,
            raa,
            rca,
            rst,
            rcs,
            rss,
        };
        let (et, h) = self.solve_fluxes(met);
        self.et = et;
        self.h = h;
        self.canopytemp = self.canopy_temperature(met);
        Ok(())
    }

    /// Converts hour-integrated latent heat (W/m2 times hours) to mm of
    /// water per day and sensible heat to MJ/m2/day.
    pub fn store_daily(&mut self, et_sums: [f64; 3], h_sums: [f64; 3]) {
        let lambda = 2_454_000.0; // latent heat of vaporization (J/kg)
        let to_mm = 3600.0 / lambda;
        let to_mj = 3600.0 / 1.0e6;
        self.dayet = HeatFlux {
            total: et_sums[0] * to_mm,
            crop: et_sums[1] * to_mm,
            soil: et_sums[2] * to_mm,
        };
        self.dayh = HeatFlux {
            total: h_sums[0] * to_mj,
            crop: h_sums[1] * to_mj,
            soil: h_sums[2] * to_mj,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::meteo::SiteConfig;
    use crate::sim::photosyn::{Photosyn, PhotosynConfig};
    use crate::sim::soil::{LayerSpec, SoilConfig, SoilWater, Texture};
    use crate::sim::weather::{WeatherFile, WeatherSource};

    fn met() -> Meteo {
        let mut s = String::from("*doy,tmin,tmax,wind,rain\n");
        for d in 1..=365 {
            s.push_str(&format!("{d},22.0,32.0,1.8,0.0\n"));
        }
        let source: Box<dyn WeatherSource> = Box::new(WeatherFile::parse(&s, 365).unwrap());
        Meteo::new(
            SiteConfig {
                lat: 3.0,
                methgt: 10.0,
                doy: 100,
                solarhour: 12.0,
                dewtemp: 22.0,
                lag: 2.0,
                reuse_weather: true,
            },
            source,
        )
        .unwrap()
    }

    fn soil(vwc: f64) -> SoilWater {
        let texture = Texture {
            clay: 10.0,
            sand: 60.0,
            om: 1.5,
        };
        SoilWater::new(&SoilConfig {
            numintervals: 24,
            rootdepth: 0.5,
            maxrootdepth: 2.0,
            has_watertable: false,
            layers: vec![
                LayerSpec { thick: 0.2, vwc, texture },
                LayerSpec { thick: 0.8, vwc, texture },
            ],
        })
        .unwrap()
    }

    fn photo(met: &Meteo, lai: f64) -> Photosyn {
        let mut p = Photosyn::new(&PhotosynConfig {
            co2ambient: 400.0,
            co2change: 0.0,
            quantum_yield: 0.051,
            clump: 1.0,
        })
        .unwrap();
        p.set_daily(lai).unwrap();
        p.update_hour(met, lai);
        p
    }

    fn energy(treehgt: f64) -> EnergyBal {
        let mut e = EnergyBal::new(&EnergyConfig {
            refhgt: 35.0,
            windext: 2.0,
            eddyext: 2.0,
            dcoef: 0.64,
            z0coef: 0.13,
            leaflength: 0.7,
            leafwidth: 0.04,
        })
        .unwrap();
        e.set_daily_immutables(treehgt);
        e
    }

    #[test]
    fn test_energy_closure() {
        let m = met();
        let s = soil(-2.0);
        let lai = 3.5;
        let p = photo(&m, lai);
        let mut e = energy(10.0);
        e.instant_fluxes(&m, &s, &p, lai, 6.0, 10.0).unwrap();

        let closure =
            e.availegy.net - (e.et.total + e.h.total + e.availegy.g);
        assert!(closure.abs() < 1.0, "energy closure residual {closure} W/m2");
        assert!((e.et.total - (e.et.crop + e.et.soil)).abs() < 1e-9);
        assert!((e.h.total - (e.h.crop + e.h.soil)).abs() < 1e-9);
        assert!(e.et.total > 0.0, "midday latent heat should be positive");
    }

    #[test]
    fn test_resistances_positive() {
        let m = met();
        let s = soil(-2.0);
        let p = photo(&m, 3.5);
        let mut e = energy(10.0);
        e.instant_fluxes(&m, &s, &p, 3.5, 6.0, 10.0).unwrap();
        let r = e.res;
        for (name, v) in [
            ("rsa", r.rsa),
            ("raa", r.raa),
            ("rca", r.rca),
            ("rst", r.rst),
            ("rcs", r.rcs),
            ("rss", r.rss),
        ] {
            assert!(v > 0.0 && v.is_finite(), "{name} = {v}");
        }
        assert!(e.ustar > 0.0);
        assert!(e.ucrophgt > 0.0);
    }

    #[test]
    fn test_zero_lai_fallback() {
        let m = met();
        let s = soil(-2.0);
        let p = photo(&m, 0.0);
        let mut e = energy(1.0);
        e.instant_fluxes(&m, &s, &p, 0.0, 6.0, 1.0).unwrap();
        assert!(e.availegy.crop.abs() < 1e-9);
        assert!(e.et.crop.abs() < 1e-12);
        assert!(e.h.crop.abs() < 1e-12);
        assert!((e.canopytemp - m.airtemp).abs() < 1e-12);
        assert!(e.et.soil.is_finite() && e.h.soil.is_finite());
    }

    #[test]
    fn test_tree_taller_than_reference_is_an_error() {
        let m = met();
        let s = soil(-2.0);
        let p = photo(&m, 3.0);
        let mut e = energy(40.0);
        let err = e.instant_fluxes(&m, &s, &p, 3.0, 6.0, 40.0);
        assert!(err.is_err());
        let msg = format!("{:#}", err.unwrap_err());
        assert!(msg.contains("doy"), "error should carry the timestamp: {msg}");
    }

    #[test]
    fn test_water_stress_shuts_down_transpiration() {
        let m = met();
        let dry = soil(-3.0); // at permanent wilting
        let wet = soil(-1.5);
        let p = photo(&m, 3.5);

        let mut e_dry = energy(10.0);
        e_dry.instant_fluxes(&m, &dry, &p, 3.5, 6.0, 10.0).unwrap();
        let mut e_wet = energy(10.0);
        e_wet.instant_fluxes(&m, &wet, &p, 3.5, 6.0, 10.0).unwrap();

        assert!(e_dry.stressfn.water.abs() < 1e-9);
        assert!(e_dry.res.rst > 1e6, "stomata closed at wilting point");
        assert!(e_dry.et.crop < e_wet.et.crop * 0.05);
    }

    #[test]
    fn test_canopy_temperature_band() {
        let m = met();
        let s = soil(-2.0);
        let p = photo(&m, 3.5);
        let mut e = energy(10.0);
        e.instant_fluxes(&m, &s, &p, 3.5, 6.0, 10.0).unwrap();
        assert!((e.canopytemp - m.airtemp).abs() <= 15.0);
    }

    #[test]
    fn test_store_daily_units() {
        let mut e = energy(10.0);
        // a constant 100 W/m2 for what amounts to 24 hours
        e.store_daily([2400.0, 1200.0, 1200.0], [2400.0, 1200.0, 1200.0]);
        assert!((e.dayet.total - 2400.0 * 3600.0 / 2_454_000.0).abs() < 1e-9);
        assert!((e.dayh.total - 8.64).abs() < 1e-9);
        assert!((e.dayet.total - (e.dayet.crop + e.dayet.soil)).abs() < 1e-9);
    }
}
