use anyhow::{Context, Result};

use crate::sim::driver::Simulation;

/// One step of a dotted probe path: a name with an optional `[index]` or
/// `[key]` accessor (quotes around keys are accepted).
#[derive(Debug, Clone, PartialEq)]
struct Segment {
    name: String,
    bracket: Option<String>,
}

fn parse_path(path: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    for part in path.split('.') {
        let part = part.trim();
        anyhow::ensure!(!part.is_empty(), "empty segment in probe path '{path}'");
        let (name, bracket) = match part.split_once('[') {
            Some((name, rest)) => {
                let inner = rest
                    .strip_suffix(']')
                    .with_context(|| format!("unterminated '[' in probe path '{path}'"))?;
                let inner = inner
                    .trim()
                    .trim_matches(|c| c == '"' || c == '\'')
                    .to_string();
                (name.to_string(), Some(inner))
            }
            None => (part.to_string(), None),
        };
        segments.push(Segment { name, bracket });
    }
    Ok(segments)
}

fn want_plain(seg: &Segment) -> Result<()> {
    anyhow::ensure!(
        seg.bracket.is_none(),
        "'{}' does not take an index",
        seg.name
    );
    Ok(())
}

/// Resolves a dotted attribute path (e.g. `parts.trunk.maint`,
/// `layers[1].fluxes[influx]`, `res.rst`, `lai`) against the published
/// component surfaces. Unknown names are errors.
pub fn resolve(sim: &Simulation, path: &str) -> Result<f64> {
    let segments = parse_path(path)?;
    let first = &segments[0];

    let field_err = |name: &str| anyhow::anyhow!("unknown probe path '{path}' (at '{name}')");

    let value = match first.name.as_str() {
        // meteorology
        "doy" => sim.meteo.doy as f64,
        "solarhour" => sim.meteo.solarhour,
        "nyears" => f64::from(sim.meteo.nyears),
        "daytmin" => sim.meteo.daytmin,
        "daytmax" => sim.meteo.daytmax,
        "daytmean" => sim.meteo.daytmean,
        "daywind" => sim.meteo.daywind,
        "dayrain" => sim.meteo.dayrain,
        "daylen" => sim.meteo.daylen,
        "airtemp" => sim.meteo.airtemp,
        "netradiation" => sim.meteo.netrad,
        "svp" => sim.meteo.svp,
        "vp" => sim.meteo.vp,
        "vpd" => sim.meteo.vpd,
        "rh" => sim.meteo.rh,
        "windspd" => sim.meteo.windspd,

        // crop scalars
        "treeage" => f64::from(sim.crop.treeage),
        "plantdens" => sim.crop.plantdens,
        "lai" => sim.crop.lai,
        "laimax" => sim.crop.laimax,
        "sla" => sim.crop.sla,
        "trunkhgt" => sim.crop.trunkhgt,
        "treehgt" => sim.crop.treehgt,
        "vdmwgt" => sim.crop.vdmwgt,
        "tdmwgt" => sim.crop.tdmwgt,
        "vdmreq" => sim.crop.vdmreq,
        "assim4maint" => sim.crop.assim4maint,
        "assim4growth" => sim.crop.assim4growth,
        "assim4gen" => sim.crop.assim4gen,
        "bunchyield" => sim.crop.bunchyield,
        "flowersex" => f64::from(sim.crop.flowersex.code()),

        // photosynthesis scalars
        "co2ambient" => sim.photosyn.co2ambient,
        "co2internal" => sim.photosyn.co2internal,
        "gap" => sim.photosyn.gap,
        "canopyassim" => sim.photosyn.canopyassim,
        "dayassim" => sim.photosyn.dayassim,

        // energy scalars
        "canopytemp" => sim.energy.canopytemp,
        "ustar" => sim.energy.ustar,
        "ucrophgt" => sim.energy.ucrophgt,
        "d" => sim.energy.d,
        "z0" => sim.energy.z0,

        // soil scalars
        "rootdepth" => sim.soil.rootdepth,
        "netrain" => sim.soil.netrain,
        "runoff" => sim.soil.runoff,

        // structured surfaces
        "parts" => {
            want_plain(first)?;
            let part_seg = segments.get(1).with_context(|| format!("'{path}': which part?"))?;
            let field_seg = segments.get(2).with_context(|| format!("'{path}': which field?"))?;
            want_plain(part_seg)?;
            want_plain(field_seg)?;
            let p = &sim.crop.parts;
            let part = match part_seg.name.as_str() {
                "pinnae" => &p.pinnae,
                "rachis" => &p.rachis,
                "trunk" => &p.trunk,
                "roots" => &p.roots,
                "maleflo" => &p.maleflo,
                "femaflo" => &p.femaflo,
                "bunches" => &p.bunches,
                other => return Err(field_err(other)),
            };
            match field_seg.name.as_str() {
                "maint" => part.maint,
                "frac" => part.frac,
                "growth" => part.growth,
                "death" => part.death,
                "weight" => part.weight,
                other => return Err(field_err(other)),
            }
        }
        "layers" => {
            let idx: usize = first
                .bracket
                .as_deref()
                .with_context(|| format!("'{path}': layers needs an index"))?
                .parse()
                .with_context(|| format!("'{path}': bad layer index"))?;
            let layer = sim
                .soil
                .layers
                .get(idx)
                .with_context(|| format!("'{path}': layer {idx} out of range"))?;
            let field_seg = segments.get(1).with_context(|| format!("'{path}': which field?"))?;
            match field_seg.name.as_str() {
                "vwc" => layer.vwc,
                "wc" => layer.wc,
                "thick" => layer.thick,
                "depth" => layer.depth,
                "accthick" => layer.accthick,
                "matric" => layer.matric,
                "gravity" => layer.gravity,
                "k" => layer.k,
                "ksat" => layer.ksat,
                "fluxes" => {
                    let key = field_seg
                        .bracket
                        .as_deref()
                        .with_context(|| format!("'{path}': fluxes needs a key"))?;
                    match key {
                        "t" => layer.fluxes.t,
                        "e" => layer.fluxes.e,
                        "influx" => layer.fluxes.influx,
                        "outflux" => layer.fluxes.outflux,
                        "netflux" => layer.fluxes.netflux,
                        other => return Err(field_err(other)),
                    }
                }
                other => return Err(field_err(other)),
            }
        }
        "rootwater" => {
            let field_seg = segments.get(1).with_context(|| format!("'{path}': which field?"))?;
            let rz = &sim.soil.rootzone;
            match field_seg.name.as_str() {
                "wc" => rz.wc,
                "vwc" => rz.vwc,
                "critical" => rz.critical,
                "sat" => rz.sat,
                "fc" => rz.fc,
                "pwp" => rz.pwp,
                other => return Err(field_err(other)),
            }
        }
        "waterstresses" => {
            let field_seg = segments.get(1).with_context(|| format!("'{path}': which field?"))?;
            match field_seg.name.as_str() {
                "crop" => sim.soil.stresses.crop,
                "soil" => sim.soil.stresses.soil,
                other => return Err(field_err(other)),
            }
        }
        "aet" => {
            let field_seg = segments.get(1).with_context(|| format!("'{path}': which field?"))?;
            match field_seg.name.as_str() {
                "crop" => sim.soil.aet.crop,
                "soil" => sim.soil.aet.soil,
                other => return Err(field_err(other)),
            }
        }
        "res" => {
            let field_seg = segments.get(1).with_context(|| format!("'{path}': which field?"))?;
            let r = &sim.energy.res;
            match field_seg.name.as_str() {
                "rsa" => r.rsa,
                "raa" => r.raa,
                "rca" => r.rca,
                "rst" => r.rst,
                "rcs" => r.rcs,
                "rss" => r.rss,
                other => return Err(field_err(other)),
            }
        }
        "et" | "dayet" | "h" | "dayh" => {
            let flux = match first.name.as_str() {
                "et" => &sim.energy.et,
                "dayet" => &sim.energy.dayet,
                "h" => &sim.energy.h,
                _ => &sim.energy.dayh,
            };
            let field_seg = segments.get(1).with_context(|| format!("'{path}': which field?"))?;
            match field_seg.name.as_str() {
                "total" => flux.total,
                "crop" => flux.crop,
                "soil" => flux.soil,
                other => return Err(field_err(other)),
            }
        }
        "availegy" => {
            let field_seg = segments.get(1).with_context(|| format!("'{path}': which field?"))?;
            let a = &sim.energy.availegy;
            match field_seg.name.as_str() {
                "total" => a.total,
                "crop" => a.crop,
                "soil" => a.soil,
                "net" => a.net,
                "g" => a.g,
                other => return Err(field_err(other)),
            }
        }
        "stressfn" => {
            let field_seg = segments.get(1).with_context(|| format!("'{path}': which field?"))?;
            let s = &sim.energy.stressfn;
            match field_seg.name.as_str() {
                "water" => s.water,
                "vpd" => s.vpd,
                "par" => s.par,
                other => return Err(field_err(other)),
            }
        }
        "laicomp" => {
            let field_seg = segments.get(1).with_context(|| format!("'{path}': which field?"))?;
            let l = &sim.photosyn.laicomp;
            match field_seg.name.as_str() {
                "total" => l.total,
                "sunlit" => l.sunlit,
                "shaded" => l.shaded,
                other => return Err(field_err(other)),
            }
        }
        "extcoef" => {
            let field_seg = segments.get(1).with_context(|| format!("'{path}': which field?"))?;
            match field_seg.name.as_str() {
                "kdr" => sim.photosyn.extcoef.kdr,
                "kdf" => sim.photosyn.extcoef.kdf,
                other => return Err(field_err(other)),
            }
        }
        "assimcoef" => {
            let field_seg = segments.get(1).with_context(|| format!("'{path}': which field?"))?;
            let a = &sim.photosyn.assimcoef;
            match field_seg.name.as_str() {
                "mmco2" => a.mmco2,
                "mmo2" => a.mmo2,
                "specificity" => a.specificity,
                "vcmax" => a.vcmax,
                "co2pt" => a.co2pt,
                other => return Err(field_err(other)),
            }
        }
        "leafassim" => {
            let field_seg = segments.get(1).with_context(|| format!("'{path}': which field?"))?;
            let l = &sim.photosyn.leafassim;
            match field_seg.name.as_str() {
                "vc" => l.vc,
                "vqsl" => l.vqsl,
                "vqsh" => l.vqsh,
                "vs" => l.vs,
                "sunlit" => l.sunlit,
                "shaded" => l.shaded,
                other => return Err(field_err(other)),
            }
        }
        "par" => {
            let field_seg = segments.get(1).with_context(|| format!("'{path}': which field?"))?;
            let p = &sim.photosyn.par;
            match field_seg.name.as_str() {
                "outdr" => p.outdr,
                "outdf" => p.outdf,
                "indrscatter" => p.indrscatter,
                "indr" => p.indr,
                "inscatter" => p.inscatter,
                "indf" => p.indf,
                "abssunlit" => p.abssunlit,
                "absshaded" => p.absshaded,
                other => return Err(field_err(other)),
            }
        }
        other => return Err(field_err(other)),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ini::Config;

    fn sim() -> Simulation {
        let mut sim = Simulation::new(&Config::default()).unwrap();
        sim.daily_update().unwrap();
        sim
    }

    #[test]
    fn test_scalar_paths() {
        let s = sim();
        assert!((resolve(&s, "doy").unwrap() - 1.0).abs() < 1e-12);
        assert!(resolve(&s, "lai").unwrap() > 0.0);
        assert!(resolve(&s, "dayassim").unwrap() >= 0.0);
    }

    #[test]
    fn test_structured_paths() {
        let s = sim();
        assert!(resolve(&s, "parts.trunk.weight").unwrap() > 0.0);
        assert!(resolve(&s, "parts.trunk.maint").unwrap() >= 0.0);
        assert!(resolve(&s, "layers[1].vwc").unwrap() > 0.0);
        assert!(resolve(&s, "layers[1].fluxes[\"influx\"]").unwrap().is_finite());
        assert!(resolve(&s, "layers[1].fluxes[netflux]").unwrap().is_finite());
        assert!(resolve(&s, "res.rst").unwrap() > 0.0);
        assert!(resolve(&s, "availegy.net").unwrap().is_finite());
        assert!(resolve(&s, "rootwater.critical").unwrap() > 0.0);
    }

    #[test]
    fn test_bad_paths_rejected() {
        let s = sim();
        assert!(resolve(&s, "nonsense").is_err());
        assert!(resolve(&s, "parts.trunk.colour").is_err());
        assert!(resolve(&s, "layers[99].vwc").is_err());
        assert!(resolve(&s, "layers.vwc").is_err());
        assert!(resolve(&s, "layers[0").is_err());
    }
}
