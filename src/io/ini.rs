use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::lookup::LookupTable;
use crate::sim::crop::{CropConfig, PartContent};
use crate::sim::energy::EnergyConfig;
use crate::sim::meteo::SiteConfig;
use crate::sim::photosyn::PhotosynConfig;
use crate::sim::soil::{LayerSpec, SoilConfig, Texture};
use crate::sim::weather::generate::{
    fill_months, GeneratorParams, RainParams, TempParams, WindParams,
};

/// The fully-resolved model initialization record.
///
/// Built from a plain-text `key = value` file. Every recognised key has a
/// default; unknown keys are rejected. Lookup tables are written as
/// `x1:y1; x2:y2; ...`, monthly parameter lists as whitespace- or
/// comma-separated numbers (shorter lists are tiled to 12 months).
#[derive(Debug, Clone)]
pub struct Config {
    pub site: SiteConfig,
    /// Seed as given; zero or negative requests an entropy seed.
    pub seed: i64,
    /// The seed actually used (recorded so any run can be reproduced).
    pub effective_seed: u64,
    pub is_generated: bool,
    pub weatherfile: String,
    /// Directory against which relative file names are resolved.
    pub basedir: PathBuf,
    pub generator: GeneratorParams,
    pub energy: EnergyConfig,
    pub photosyn: PhotosynConfig,
    pub soil: SoilConfig,
    pub crop: CropConfig,
    pub auxfile: Option<String>,
    pub auxvars: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        let content = |n: f64, m: f64| PartContent {
            n: LookupTable::constant(n),
            m: LookupTable::constant(m),
        };
        let texture = Texture {
            clay: 10.0,
            sand: 60.0,
            om: 1.5,
        };
        Self {
            site: SiteConfig {
                lat: 3.0,
                methgt: 10.0,
                doy: 1,
                solarhour: 0.0,
                dewtemp: 22.0,
                lag: 2.0,
                reuse_weather: false,
            },
            seed: 1,
            effective_seed: 1,
            is_generated: true,
            weatherfile: "weather.txt".to_string(),
            basedir: PathBuf::new(),
            generator: GeneratorParams {
                rain: RainParams {
                    pww: [0.45; 12],
                    pwd: [0.35; 12],
                    shape: [0.8; 12],
                    scale: [14.0; 12],
                },
                tmax: TempParams {
                    mean: 31.5,
                    amp: 1.0,
                    cv: 0.05,
                    ampcv: 0.01,
                    meanwet: 30.5,
                },
                tmin: TempParams {
                    mean: 22.5,
                    amp: 0.8,
                    cv: 0.04,
                    ampcv: 0.01,
                    meanwet: 22.0,
                },
                wind: WindParams {
                    shape: [2.0; 12],
                    scale: [1.2; 12],
                },
            },
            energy: EnergyConfig {
                refhgt: 35.0,
                windext: 2.0,
                eddyext: 2.0,
                dcoef: 0.64,
                z0coef: 0.13,
                leaflength: 0.7,
                leafwidth: 0.04,
            },
            photosyn: PhotosynConfig {
                co2ambient: 400.0,
                co2change: 0.0,
                quantum_yield: 0.051,
                clump: 1.0,
            },
            soil: SoilConfig {
                numintervals: 24,
                rootdepth: 0.5,
                maxrootdepth: 2.0,
                has_watertable: false,
                layers: vec![
                    LayerSpec { thick: 0.2, vwc: -2.0, texture },
                    LayerSpec { thick: 0.3, vwc: -2.0, texture },
                    LayerSpec { thick: 0.5, vwc: -2.0, texture },
                    LayerSpec { thick: 1.0, vwc: -2.0, texture },
                ],
            },
            crop: CropConfig {
                treeage: 3650,
                plantdens: 136.0,
                thinplantdens: 0.0,
                thinage: 0,
                femaleprob: 0.5,
                sla: LookupTable::new([(1.0, 9.0), (3650.0, 4.5), (10950.0, 3.5)]).unwrap(),
                weights: [60.0, 90.0, 400.0, 40.0, 1.0, 5.0, 30.0],
                contents: [
                    content(0.025, 0.010),
                    content(0.006, 0.004),
                    content(0.003, 0.002),
                    content(0.005, 0.002),
                ],
                veg_fracs: [
                    LookupTable::constant(0.24),
                    LookupTable::constant(0.46),
                    LookupTable::constant(0.14),
                    LookupTable::constant(0.16),
                ],
                seed: 1,
            },
            auxfile: None,
            auxvars: Vec::new(),
        }
    }
}

fn parse_f64(key: &str, value: &str) -> Result<f64> {
    value
        .parse()
        .with_context(|| format!("key '{key}': '{value}' is not a number"))
}

fn parse_u32(key: &str, value: &str) -> Result<u32> {
    value
        .parse()
        .with_context(|| format!("key '{key}': '{value}' is not a non-negative integer"))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => anyhow::bail!("key '{key}': '{value}' is not a boolean"),
    }
}

/// A lookup table written as `x1:y1; x2:y2; ...`.
fn parse_table(key: &str, value: &str) -> Result<LookupTable> {
    let mut pairs = Vec::new();
    for item in value.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let (x, y) = item
            .split_once(':')
            .with_context(|| format!("key '{key}': '{item}' is not an x:y pair"))?;
        pairs.push((parse_f64(key, x.trim())?, parse_f64(key, y.trim())?));
    }
    LookupTable::new(pairs).with_context(|| format!("key '{key}': empty table"))
}

/// A monthly parameter list, tiled/truncated to 12 entries.
fn parse_months(key: &str, value: &str) -> Result<[f64; 12]> {
    let values: Vec<f64> = value
        .split(|c: char| c == ' ' || c == ',' || c == '\t')
        .filter(|s| !s.is_empty())
        .map(|s| parse_f64(key, s))
        .collect::<Result<_>>()?;
    fill_months(&values).with_context(|| format!("key '{key}'"))
}

#[derive(Default, Clone, Copy)]
struct LayerDraft {
    thick: Option<f64>,
    vwc: Option<f64>,
    clay: Option<f64>,
    sand: Option<f64>,
    om: Option<f64>,
}

impl Config {
    /// Reads and materialises the initialization file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read initialization file {}", path.display()))?;
        let mut cfg = Self::parse(&content)
            .with_context(|| format!("cannot parse initialization file {}", path.display()))?;
        cfg.basedir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(cfg)
    }

    /// Resolves a configured file name against the initialization file's
    /// directory.
    pub fn resolve(&self, name: &str) -> PathBuf {
        let p = Path::new(name);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.basedir.join(p)
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut cfg = Self::default();
        let mut numlayers: Option<usize> = None;
        let mut drafts: BTreeMap<usize, LayerDraft> = BTreeMap::new();
        let mut saw_layer_key = false;

        for (lineno, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .with_context(|| format!("line {}: expected 'key = value'", lineno + 1))?;
            let key = key.trim();
            let value = value.trim();

            if let Some(rest) = key.strip_prefix("layer") {
                if let Some((idx, field)) = rest.split_once('.') {
                    let idx: usize = idx
                        .parse()
                        .with_context(|| format!("bad layer index in key '{key}'"))?;
                    anyhow::ensure!(idx >= 1, "layer indices start at 1, got '{key}'");
                    let draft = drafts.entry(idx - 1).or_default();
                    let v = parse_f64(key, value)?;
                    match field {
                        "thick" => draft.thick = Some(v),
                        "vwc" => draft.vwc = Some(v),
                        "clay" => draft.clay = Some(v),
                        "sand" => draft.sand = Some(v),
                        "om" => draft.om = Some(v),
                        _ => anyhow::bail!("unknown key '{key}'"),
                    }
                    saw_layer_key = true;
                    continue;
                }
            }

            match key {
                "lat" => cfg.site.lat = parse_f64(key, value)?,
                "methgt" => cfg.site.methgt = parse_f64(key, value)?,
                "doy" => cfg.site.doy = parse_u32(key, value)?,
                "solarhour" => cfg.site.solarhour = parse_f64(key, value)?,
                "dewtemp" => cfg.site.dewtemp = parse_f64(key, value)?,
                "lag" => cfg.site.lag = parse_f64(key, value)?,
                "reuse_weather" => cfg.site.reuse_weather = parse_bool(key, value)?,
                "seed" => cfg.seed = value
                    .parse()
                    .with_context(|| format!("key 'seed': '{value}' is not an integer"))?,
                "is_generated" => cfg.is_generated = parse_bool(key, value)?,
                "weatherfile" => cfg.weatherfile = value.to_string(),

                "rain_pww" => cfg.generator.rain.pww = parse_months(key, value)?,
                "rain_pwd" => cfg.generator.rain.pwd = parse_months(key, value)?,
                "rain_shape" => cfg.generator.rain.shape = parse_months(key, value)?,
                "rain_scale" => cfg.generator.rain.scale = parse_months(key, value)?,
                "tmax_mean" => cfg.generator.tmax.mean = parse_f64(key, value)?,
                "tmax_amp" => cfg.generator.tmax.amp = parse_f64(key, value)?,
                "tmax_cv" => cfg.generator.tmax.cv = parse_f64(key, value)?,
                "tmax_ampcv" => cfg.generator.tmax.ampcv = parse_f64(key, value)?,
                "tmax_meanwet" => cfg.generator.tmax.meanwet = parse_f64(key, value)?,
                "tmin_mean" => cfg.generator.tmin.mean = parse_f64(key, value)?,
                "tmin_amp" => cfg.generator.tmin.amp = parse_f64(key, value)?,
                "tmin_cv" => cfg.generator.tmin.cv = parse_f64(key, value)?,
                "tmin_ampcv" => cfg.generator.tmin.ampcv = parse_f64(key, value)?,
                "tmin_meanwet" => cfg.generator.tmin.meanwet = parse_f64(key, value)?,
                "wind_shape" => cfg.generator.wind.shape = parse_months(key, value)?,
                "wind_scale" => cfg.generator.wind.scale = parse_months(key, value)?,

                "refhgt" => cfg.energy.refhgt = parse_f64(key, value)?,
                "windext" => cfg.energy.windext = parse_f64(key, value)?,
                "eddyext" => cfg.energy.eddyext = parse_f64(key, value)?,
                "dcoef" => cfg.energy.dcoef = parse_f64(key, value)?,
                "z0coef" => cfg.energy.z0coef = parse_f64(key, value)?,
                "leafdim.length" => cfg.energy.leaflength = parse_f64(key, value)?,
                "leafdim.width" => cfg.energy.leafwidth = parse_f64(key, value)?,

                "co2ambient" => cfg.photosyn.co2ambient = parse_f64(key, value)?,
                "co2change" => cfg.photosyn.co2change = parse_f64(key, value)?,
                "quantum_yield" => cfg.photosyn.quantum_yield = parse_f64(key, value)?,
                "clump" => cfg.photosyn.clump = parse_f64(key, value)?,

                "numintervals" => cfg.soil.numintervals = parse_u32(key, value)?,
                "rootdepth" => cfg.soil.rootdepth = parse_f64(key, value)?,
                "maxrootdepth" => cfg.soil.maxrootdepth = parse_f64(key, value)?,
                "has_watertable" => cfg.soil.has_watertable = parse_bool(key, value)?,
                "numlayers" => numlayers = Some(parse_u32(key, value)? as usize),

                "treeage" => cfg.crop.treeage = parse_u32(key, value)?,
                "plantdens" => cfg.crop.plantdens = parse_f64(key, value)?,
                "thinplantdens" => cfg.crop.thinplantdens = parse_f64(key, value)?,
                "thinage" => cfg.crop.thinage = parse_u32(key, value)?,
                "female_prob" => cfg.crop.femaleprob = parse_f64(key, value)?,
                "sla" => cfg.crop.sla = parse_table(key, value)?,

                "pinnae_wgt" => cfg.crop.weights[0] = parse_f64(key, value)?,
                "rachis_wgt" => cfg.crop.weights[1] = parse_f64(key, value)?,
                "trunk_wgt" => cfg.crop.weights[2] = parse_f64(key, value)?,
                "roots_wgt" => cfg.crop.weights[3] = parse_f64(key, value)?,
                "maleflo_wgt" => cfg.crop.weights[4] = parse_f64(key, value)?,
                "femaflo_wgt" => cfg.crop.weights[5] = parse_f64(key, value)?,
                "bunches_wgt" => cfg.crop.weights[6] = parse_f64(key, value)?,

                "pinnae_n" => cfg.crop.contents[0].n = parse_table(key, value)?,
                "pinnae_m" => cfg.crop.contents[0].m = parse_table(key, value)?,
                "rachis_n" => cfg.crop.contents[1].n = parse_table(key, value)?,
                "rachis_m" => cfg.crop.contents[1].m = parse_table(key, value)?,
                "trunk_n" => cfg.crop.contents[2].n = parse_table(key, value)?,
                "trunk_m" => cfg.crop.contents[2].m = parse_table(key, value)?,
                "roots_n" => cfg.crop.contents[3].n = parse_table(key, value)?,
                "roots_m" => cfg.crop.contents[3].m = parse_table(key, value)?,

                "pinnae_frac" => cfg.crop.veg_fracs[0] = parse_table(key, value)?,
                "rachis_frac" => cfg.crop.veg_fracs[1] = parse_table(key, value)?,
                "trunk_frac" => cfg.crop.veg_fracs[2] = parse_table(key, value)?,
                "roots_frac" => cfg.crop.veg_fracs[3] = parse_table(key, value)?,

                "auxfile" => cfg.auxfile = Some(value.to_string()),
                "auxvars" => {
                    cfg.auxvars = value
                        .split(';')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect();
                }

                _ => anyhow::bail!("unknown key '{key}'"),
            }
        }

        if saw_layer_key || numlayers.is_some() {
            let n = numlayers.unwrap_or_else(|| drafts.len());
            anyhow::ensure!(n >= 1, "numlayers must be at least 1");
            let mut layers = Vec::with_capacity(n);
            for i in 0..n {
                let draft = drafts
                    .get(&i)
                    .with_context(|| format!("layer{} is missing", i + 1))?;
                let field = |name: &str, v: Option<f64>| {
                    v.with_context(|| format!("layer{}.{name} is missing", i + 1))
                };
                layers.push(LayerSpec {
                    thick: field("thick", draft.thick)?,
                    vwc: field("vwc", draft.vwc)?,
                    texture: Texture {
                        clay: field("clay", draft.clay)?,
                        sand: field("sand", draft.sand)?,
                        om: field("om", draft.om)?,
                    },
                });
            }
            anyhow::ensure!(
                drafts.keys().all(|&i| i < n),
                "layer keys exceed numlayers = {n}"
            );
            cfg.soil.layers = layers;
        }

        cfg.effective_seed = if cfg.seed > 0 {
            cfg.seed as u64
        } else {
            rand::random()
        };
        cfg.crop.seed = cfg.effective_seed.wrapping_add(1);
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_parse_empty() {
        let cfg = Config::parse("# nothing but comments\n\n").unwrap();
        assert!((cfg.site.lat - 3.0).abs() < 1e-12);
        assert_eq!(cfg.soil.layers.len(), 4);
        assert_eq!(cfg.effective_seed, 1);
    }

    #[test]
    fn test_overrides() {
        let text = "
            lat = -2.5
            seed = 42
            refhgt = 40
            leafdim.length = 0.65
            leafdim.width = 0.05
            co2ambient = 380
            female_prob = 0.6
            sla = 1:9.0; 3650:4.2; 7300:3.6
            rain_pww = 0.4 0.5 0.6
            numlayers = 2
            layer1.thick = 0.25
            layer1.vwc = -2
            layer1.clay = 15
            layer1.sand = 55
            layer1.om = 2
            layer2.thick = 0.75
            layer2.vwc = -1.5
            layer2.clay = 20
            layer2.sand = 50
            layer2.om = 1
        ";
        let cfg = Config::parse(text).unwrap();
        assert!((cfg.site.lat + 2.5).abs() < 1e-12);
        assert_eq!(cfg.seed, 42);
        assert_eq!(cfg.effective_seed, 42);
        assert_eq!(cfg.crop.seed, 43);
        assert!((cfg.energy.refhgt - 40.0).abs() < 1e-12);
        assert!((cfg.energy.leaflength - 0.65).abs() < 1e-12);
        assert!((cfg.crop.femaleprob - 0.6).abs() < 1e-12);
        assert!((cfg.crop.sla.val(3650.0) - 4.2).abs() < 1e-12);
        assert!((cfg.generator.rain.pww[3] - 0.4).abs() < 1e-12, "monthly list tiles");
        assert_eq!(cfg.soil.layers.len(), 2);
        assert!((cfg.soil.layers[1].texture.clay - 20.0).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = Config::parse("latx = 3.0").unwrap_err();
        assert!(format!("{err:#}").contains("unknown key"));
        assert!(Config::parse("layer1.colour = 7").is_err());
    }

    #[test]
    fn test_incomplete_layer_rejected() {
        let text = "
            numlayers = 2
            layer1.thick = 0.25
            layer1.vwc = -2
            layer1.clay = 15
            layer1.sand = 55
            layer1.om = 2
        ";
        assert!(Config::parse(text).is_err());
    }

    #[test]
    fn test_bad_value_rejected() {
        assert!(Config::parse("lat = north").is_err());
        assert!(Config::parse("sla = 1:2; 3").is_err());
        assert!(Config::parse("has_watertable = maybe").is_err());
    }

    #[test]
    fn test_entropy_seed_when_nonpositive() {
        let a = Config::parse("seed = 0").unwrap();
        assert!(a.seed == 0 && a.effective_seed != 0);
    }

    #[test]
    fn test_auxvars_split() {
        let cfg =
            Config::parse("auxfile = aux.txt\nauxvars = parts.trunk.maint; layers[1].vwc").unwrap();
        assert_eq!(cfg.auxfile.as_deref(), Some("aux.txt"));
        assert_eq!(cfg.auxvars.len(), 2);
    }
}
