use anyhow::Result;
use serde::Serialize;

/// Soil texture (percentages).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Texture {
    pub clay: f64,
    pub sand: f64,
    pub om: f64,
}

/// Soil water characteristics (m3/m3 except where noted).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Swc {
    pub sat: f64,
    pub fc: f64,
    pub pwp: f64,
    /// Pore-size distribution index (unitless).
    pub psd: f64,
    pub porosity: f64,
    /// Air-entry suction (kPa).
    pub airentry: f64,
}

/// Water fluxes of a layer (m/day). Positive flux is downward.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LayerFluxes {
    /// Plant water uptake (transpiration).
    pub t: f64,
    /// Evaporation (surface layer only).
    pub e: f64,
    pub influx: f64,
    pub outflux: f64,
    pub netflux: f64,
}

/// One layer of the soil profile. Layers are stored top-to-bottom in an
/// ordered arena owned by [`SoilWater`]; neighbour heads are read by index.
#[derive(Debug, Clone, Serialize)]
pub struct SoilLayer {
    /// Thickness (m).
    pub thick: f64,
    pub texture: Texture,
    /// Volumetric water content (m3/m3).
    pub vwc: f64,
    /// Water content (mm).
    pub wc: f64,
    /// Cumulative thickness from the surface to this layer's bottom (m).
    pub accthick: f64,
    /// Depth of the layer's mid-point from the surface (m).
    pub depth: f64,
    pub swc: Swc,
    /// Saturated hydraulic conductivity (m/day).
    pub ksat: f64,
    /// Current (unsaturated) hydraulic conductivity (m/day).
    pub k: f64,
    /// Matric head (m).
    pub matric: f64,
    /// Gravity head (m).
    pub gravity: f64,
    pub fluxes: LayerFluxes,
}

impl SoilLayer {
    /// Builds a layer from its spec, resolving the pedotransfer functions and
    /// the negative water-content codes. `prev` is `(accthick, thick)` of the
    /// layer above, `accdepth` the running mid-point accumulator.
    fn new(
        thick: f64,
        vwc_code: f64,
        texture: Texture,
        prev: Option<(f64, f64)>,
        accdepth: &mut f64,
        is_top: bool,
    ) -> Result<Self> {
        anyhow::ensure!(thick > 0.0, "soil layer thickness must be positive");
        let (prevaccthick, prevthick) = prev.unwrap_or((0.0, 0.0));
        let accthick = thick + prevaccthick;
        let d = 0.5 * (prevthick + thick);
        let depth = *accdepth + d;
        *accdepth += d;

        // Saxton & Rawls (2006) pedotransfer from texture
        let c = texture.clay / 100.0;
        let s = texture.sand / 100.0;
        let om = texture.om; // stays in percent

        let n1 = -0.024 * s + 0.487 * c + 0.006 * om;
        let n2 = 0.005 * (s * om) - 0.013 * (c * om) + 0.068 * (s * c) + 0.031;
        let theta1500t = n1 + n2;
        let theta1500 = theta1500t + (0.14 * theta1500t - 0.02);

        let n1 = -0.251 * s + 0.195 * c + 0.011 * om;
        let n2 = 0.006 * (s * om) - 0.027 * (c * om) + 0.452 * (s * c) + 0.299;
        let theta33t = n1 + n2;
        let theta33 = theta33t + (1.283 * theta33t * theta33t - 0.374 * theta33t - 0.015);

        let n1 = 0.278 * s + 0.034 * c + 0.022 * om;
        let n2 = -0.018 * (s * om) - 0.027 * (c * om) - 0.584 * (s * c) + 0.078;
        let theta_s33t = n1 + n2;
        let theta_s33 = theta_s33t + 0.636 * theta_s33t - 0.107;

        let theta0 = theta33 + theta_s33 - 0.097 * s + 0.043;

        let dg = (-1.96 * c + 2.3 * (1.0 - s - c) + 5.76 * s).exp();
        let b = 8.25 - 1.26 * dg.ln();
        let psd = 1.0 / b;
        let airentry = 3.9 - 0.61 * dg.ln();

        let swc = Swc {
            sat: theta0,
            fc: theta33,
            pwp: theta1500,
            psd,
            porosity: theta0,
            airentry,
        };
        anyhow::ensure!(
            swc.pwp > 0.0 && swc.pwp < swc.fc && swc.fc < swc.sat,
            "pedotransfer produced an invalid PWP/FC/SAT ordering for texture \
             clay {} %, sand {} %, om {} %",
            texture.clay,
            texture.sand,
            texture.om
        );
        let ksat = 864.0 * 0.07 * (theta0 - (1.0 - (airentry / 33.0).powf(psd))).powi(4);

        // a negative vwc encodes a position on the [-3, -1] SAT-FC-PWP scale
        let vwc = if vwc_code < 0.0 {
            let code = -vwc_code;
            if (1.0..=2.0).contains(&code) {
                swc.sat - (code - 1.0) * (swc.sat - swc.fc)
            } else if code > 2.0 && code <= 3.0 {
                swc.fc - (code - 2.0) * (swc.fc - swc.pwp)
            } else {
                swc.fc
            }
        } else {
            vwc_code
        };

        let mut layer = Self {
            thick,
            texture,
            vwc,
            wc: vwc * thick * 1000.0,
            accthick,
            depth,
            swc,
            ksat,
            k: ksat,
            matric: 0.0,
            gravity: 0.0,
            fluxes: LayerFluxes::default(),
        };
        layer.update_heads_k(is_top);
        Ok(layer)
    }

    /// Updates matric and gravity heads (m) and the unsaturated hydraulic
    /// conductivity (m/day) from the current water content.
    pub fn update_heads_k(&mut self, is_top: bool) {
        let fc = self.swc.fc;
        let vwc = self.vwc;
        // matric suction, kPa converted to m of head
        let hm = if vwc >= fc {
            (33.0 - (33.0 - self.swc.airentry) * (vwc - fc) / (self.swc.sat - fc)) / 10.0
        } else {
            let b = 1.0 / self.swc.psd;
            let a = (3.496508 + b * fc.ln()).exp();
            (a * vwc.max(0.05).powf(-b)) / 10.0
        };
        self.matric = hm.max(0.0);
        self.gravity = self.depth;

        let ae = self.swc.airentry / 10.0;
        let ratio = self.vwc / self.swc.sat;
        if self.matric > ae {
            // exponent correction for the lower layers, calibrated against
            // soil water measurements from the UPM oil palm site
            let ncorr = if is_top { 1.0 } else { 0.2 };
            self.k = self.ksat * ratio.powf(3.0 + ncorr * 2.0 / self.swc.psd);
        } else {
            self.k = self.ksat;
        }
    }

    /// Total head (m): matric + gravity.
    pub fn tothead(&self) -> f64 {
        self.matric + self.gravity
    }
}

/// Water content and characteristics aggregated over the rooting zone.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RootZone {
    /// Water content (mm).
    pub wc: f64,
    /// Water content (m3/m3).
    pub vwc: f64,
    /// Content below which plant water stress sets in (m3/m3).
    pub critical: f64,
    pub sat: f64,
    pub fc: f64,
    pub pwp: f64,
}

/// Reductions to evapotranspiration (0 = full stress, 1 = no stress).
#[derive(Debug, Clone, Copy, Serialize)]
pub struct WaterStress {
    pub crop: f64,
    pub soil: f64,
}

/// Actual water losses (mm/day).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ActualEt {
    pub crop: f64,
    pub soil: f64,
}

/// Per-layer description read from the initialization file.
#[derive(Debug, Clone, Copy)]
pub struct LayerSpec {
    pub thick: f64,
    pub vwc: f64,
    pub texture: Texture,
}

#[derive(Debug, Clone)]
pub struct SoilConfig {
    pub numintervals: u32,
    pub rootdepth: f64,
    pub maxrootdepth: f64,
    pub has_watertable: bool,
    pub layers: Vec<LayerSpec>,
}

/// One-dimensional soil water balance over a layered profile, with optional
/// groundwater at a constant water table depth.
#[derive(Serialize)]
pub struct SoilWater {
    numintervals: u32,
    /// Rooting depth (m), non-decreasing.
    pub rootdepth: f64,
    maxrootdepth: f64,
    pub has_watertable: bool,
    pub layers: Vec<SoilLayer>,
    /// Cumulative fluxes over the current day (m/day).
    pub cf: Vec<LayerFluxes>,
    #[serde(skip)]
    pf: Vec<LayerFluxes>,
    pub rootzone: RootZone,
    pub stresses: WaterStress,
    /// Net rainfall (mm/day).
    pub netrain: f64,
    /// Surface runoff (mm/day): rainfall in excess of infiltration.
    pub runoff: f64,
    pub aet: ActualEt,
}

impl SoilWater {
    pub fn new(cfg: &SoilConfig) -> Result<Self> {
        anyhow::ensure!(!cfg.layers.is_empty(), "soil profile needs at least one layer");
        anyhow::ensure!(
            cfg.numintervals >= 1,
            "numintervals must be at least 1, got {}",
            cfg.numintervals
        );

        let mut layers = Vec::with_capacity(cfg.layers.len());
        let mut accdepth = 0.0;
        let mut prev: Option<(f64, f64)> = None;
        for (i, spec) in cfg.layers.iter().enumerate() {
            let layer = SoilLayer::new(
                spec.thick,
                spec.vwc,
                spec.texture,
                prev,
                &mut accdepth,
                i == 0,
            )?;
            prev = Some((layer.accthick, layer.thick));
            layers.push(layer);
        }

        let profile_depth = layers.last().unwrap().accthick;
        anyhow::ensure!(
            cfg.rootdepth > 0.0 && cfg.rootdepth <= profile_depth,
            "rooting depth {} m outside the profile (depth {} m)",
            cfg.rootdepth,
            profile_depth
        );

        let n = layers.len();
        let mut soil = Self {
            numintervals: cfg.numintervals,
            rootdepth: cfg.rootdepth,
            maxrootdepth: cfg.maxrootdepth.min(profile_depth),
            has_watertable: cfg.has_watertable,
            layers,
            cf: vec![LayerFluxes::default(); n],
            pf: vec![LayerFluxes::default(); n],
            rootzone: RootZone::default(),
            stresses: WaterStress { crop: 1.0, soil: 1.0 },
            netrain: 0.0,
            runoff: 0.0,
            aet: ActualEt::default(),
        };
        soil.update_rootzone();
        soil.stresses = soil.reduce_et();
        Ok(soil)
    }

    /// Net rainfall (mm/day): gross rainfall minus canopy interception.
    fn net_rainfall(&self, lai: f64, dayrain: f64) -> f64 {
        let fraction = (1.0 - 0.0541 * lai).max(0.7295);
        fraction * dayrain
    }

    /// Root growth: 2 mm/day scaled by crop water stress, bounded by the
    /// configured maximum and the profile bottom.
    fn rooting_depth(&self) -> f64 {
        let newdepth = self.rootdepth + (2.0 / 1000.0) * self.stresses.crop;
        newdepth.min(self.maxrootdepth)
    }

    /// Integrates layer water over the rooting depth into the root zone
    /// aggregate, with a proportional contribution from the partially
    /// penetrated layer.
    fn update_rootzone(&mut self) {
        let mut wc = 0.0;
        let mut wcsat = 0.0;
        let mut wcfc = 0.0;
        let mut wcpwp = 0.0;
        for layer in &self.layers {
            let diff = layer.thick - (layer.accthick - self.rootdepth).max(0.0);
            if diff <= 0.0 {
                break;
            }
            wc += layer.vwc * diff;
            wcsat += layer.swc.sat * diff;
            wcfc += layer.swc.fc * diff;
            wcpwp += layer.swc.pwp * diff;
        }
        let vwc = wc / self.rootdepth;
        let sat = wcsat / self.rootdepth;
        let fc = wcfc / self.rootdepth;
        let pwp = wcpwp / self.rootdepth;
        self.rootzone = RootZone {
            wc: wc * 1000.0,
            vwc,
            critical: pwp + 0.6 * (sat - pwp),
            sat,
            fc,
            pwp,
        };
    }

    /// Stress reductions to evaporation and transpiration in [0, 1].
    fn reduce_et(&self) -> WaterStress {
        let top = &self.layers[0];
        let soil = 1.0 / (1.0 + (3.6073 * (top.vwc / top.swc.sat)).powf(-9.3172));
        let rz = &self.rootzone;
        let crop = ((rz.vwc - rz.pwp) / (rz.critical - rz.pwp)).clamp(0.0, 1.0);
        WaterStress { crop, soil }
    }

    fn actual_et(&self, petcrop: f64, petsoil: f64) -> ActualEt {
        ActualEt {
            crop: self.stresses.crop * petcrop,
            soil: self.stresses.soil * petsoil,
        }
    }

    /// Upward (negative) or downward flux across the constant water table
    /// just beneath the deepest layer (m/day), from the head difference.
    fn watertable_flux(&self) -> f64 {
        let last = self.layers.last().unwrap();
        let dk = last.ksat.ln() - last.k.ln();
        let k = if dk.abs() > 0.0 {
            (last.ksat - last.k) / dk
        } else {
            last.k
        };
        let hm = last.swc.airentry / 10.0; // saturated at the table
        let hg = last.accthick;
        k * ((hm + hg) - last.tothead()) / (last.thick * 0.5)
    }

    /// One sub-interval of the daily balance: recompute heads, uptake shares
    /// and Darcy fluxes from the current contents, then integrate forward.
    fn calc_water_fluxes(&mut self, petcrop: f64, petsoil: f64, firstrun: bool) {
        self.update_rootzone();
        self.stresses = self.reduce_et();
        self.aet = self.actual_et(petcrop, petsoil);

        let n = self.layers.len();
        for i in 0..n {
            let is_top = i == 0;
            self.layers[i].update_heads_k(is_top);
        }

        // uptake split: each root-zone layer takes a share proportional to
        // its share of root-zone water
        let mut share = vec![0.0; n];
        let mut total_water = 0.0;
        for (i, layer) in self.layers.iter().enumerate() {
            let penetration = layer.thick - (layer.accthick - self.rootdepth).max(0.0);
            if penetration <= 0.0 {
                break;
            }
            share[i] = layer.vwc * penetration;
            total_water += share[i];
        }
        if total_water > 0.0 {
            for s in share.iter_mut() {
                *s /= total_water;
            }
        }

        let netrain_m = self.netrain / 1000.0;
        let mut runoff_rate = 0.0;
        for i in 0..n {
            let e = if i == 0 { self.aet.soil / 1000.0 } else { 0.0 };
            let t = self.aet.crop / 1000.0 * share[i];
            let influx = if i == 0 {
                let cap = self.layers[0].ksat;
                let inf = netrain_m.min(cap);
                runoff_rate = netrain_m - inf;
                inf
            } else {
                let (upper, lower) = (&self.layers[i - 1], &self.layers[i]);
                let dk = lower.k.ln() - upper.k.ln();
                let kmean = if dk.abs() > 0.0 {
                    (lower.k - upper.k) / dk
                } else {
                    lower.k
                };
                kmean * (lower.tothead() - upper.tothead()) / (lower.depth - upper.depth)
            };
            self.pf[i].t = t;
            self.pf[i].e = e;
            self.pf[i].influx = influx;
        }

        let ni = f64::from(self.numintervals);
        for i in 0..n {
            let influx = self.pf[i].influx;
            let (t, e) = (self.pf[i].t, self.pf[i].e);
            let mut outflux = if i + 1 < n {
                self.pf[i + 1].influx
            } else if self.has_watertable {
                self.watertable_flux()
            } else {
                self.layers[i].k // gravity drainage
            };

            // keep the layer within [pwp, sat] by adjusting its outflux
            let layer = &self.layers[i];
            let wc = layer.vwc * layer.thick;
            let drylmt = layer.thick * layer.swc.pwp;
            let satlmt = layer.thick * layer.swc.sat;
            let projected = wc + (influx - outflux - t - e) / ni;
            if projected < drylmt {
                outflux = influx - t - e - (drylmt - wc) * ni;
            } else if projected > satlmt {
                outflux = influx - t - e - (satlmt - wc) * ni;
            }
            if i + 1 < n {
                self.pf[i + 1].influx = outflux;
            }
            let netflux = influx - outflux - t - e;
            self.pf[i].outflux = outflux;
            self.pf[i].netflux = netflux;

            let layer = &mut self.layers[i];
            let wc_next = wc + netflux / ni;
            layer.vwc = (wc_next / layer.thick).clamp(layer.swc.pwp, layer.swc.sat);
            layer.wc = layer.vwc * layer.thick * 1000.0;

            if firstrun {
                self.cf[i].t = self.pf[i].t / ni;
                self.cf[i].e = self.pf[i].e / ni;
                self.cf[i].influx = self.pf[i].influx / ni;
                self.cf[i].outflux = self.pf[i].outflux / ni;
                self.cf[i].netflux = self.pf[i].netflux / ni;
            } else {
                self.cf[i].t += self.pf[i].t / ni;
                self.cf[i].e += self.pf[i].e / ni;
                self.cf[i].influx += self.pf[i].influx / ni;
                self.cf[i].outflux += self.pf[i].outflux / ni;
                self.cf[i].netflux += self.pf[i].netflux / ni;
            }
        }
        if firstrun {
            self.runoff = runoff_rate * 1000.0 / ni;
        } else {
            self.runoff += runoff_rate * 1000.0 / ni;
        }
    }

    /// Advances the profile by one day: `numintervals` explicit sub-steps,
    /// then a bounds check on every layer.
    pub fn daily_balance(
        &mut self,
        petcrop: f64,
        petsoil: f64,
        dayrain: f64,
        lai: f64,
    ) -> Result<()> {
        self.netrain = self.net_rainfall(lai, dayrain);
        self.rootdepth = self.rooting_depth();

        for i in 0..self.numintervals {
            self.calc_water_fluxes(petcrop, petsoil, i == 0);
        }

        for (i, layer) in self.layers.iter_mut().enumerate() {
            layer.fluxes = self.cf[i];
            anyhow::ensure!(
                layer.vwc >= layer.swc.pwp - 1e-9 && layer.vwc <= layer.swc.sat + 1e-9,
                "layer {i} water content {} m3/m3 escaped [pwp, sat] = [{}, {}]",
                layer.vwc,
                layer.swc.pwp,
                layer.swc.sat
            );
        }
        Ok(())
    }
}
