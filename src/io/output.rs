use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use super::probe;
use crate::sim::driver::Simulation;

/// One output value: integers print bare, floats with fixed precision.
#[derive(Debug, Clone, Copy)]
pub enum Cell {
    Int(i64),
    Num(f64),
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cell::Int(v) => write!(f, "{v}"),
            Cell::Num(v) => write!(f, "{v:.4}"),
        }
    }
}

/// Writes the run results: one header row of column names, then one row per
/// output cycle. Optionally mirrors a user-selected set of probe paths into
/// an auxiliary file. Files are owned here and closed when the writer drops,
/// on every exit path.
pub struct RunWriter {
    out: Box<dyn Write>,
    aux: Option<AuxWriter>,
}

struct AuxWriter {
    out: Box<dyn Write>,
    vars: Vec<String>,
}

impl RunWriter {
    /// Opens the output (and auxiliary, when configured) files and stamps
    /// the seed so a run can be reproduced.
    pub fn create(
        path: impl AsRef<Path>,
        seed: u64,
        aux: Option<(std::path::PathBuf, Vec<String>)>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("cannot create output file {}", path.display()))?;
        let mut out: Box<dyn Write> = Box::new(BufWriter::new(file));
        writeln!(out, "# seed {seed}")?;

        let aux = match aux {
            Some((aux_path, vars)) if !vars.is_empty() => {
                let file = File::create(&aux_path).with_context(|| {
                    format!("cannot create auxiliary file {}", aux_path.display())
                })?;
                let mut out: Box<dyn Write> = Box::new(BufWriter::new(file));
                writeln!(out, "{}", vars.join(","))?;
                Some(AuxWriter { out, vars })
            }
            _ => None,
        };
        Ok(Self { out, aux })
    }

    /// A writer over arbitrary sinks (used by the tests).
    pub fn from_writer(out: Box<dyn Write>) -> Self {
        Self { out, aux: None }
    }

    fn header(&mut self, record: &[(String, Cell)]) -> Result<()> {
        let names: Vec<&str> = record.iter().map(|(n, _)| n.as_str()).collect();
        writeln!(self.out, "{}", names.join(",")).context("writing output header")
    }

    fn row(&mut self, sim: &Simulation, record: &[(String, Cell)]) -> Result<()> {
        let cells: Vec<String> = record.iter().map(|(_, c)| c.to_string()).collect();
        writeln!(self.out, "{}", cells.join(",")).context("writing output row")?;
        if let Some(aux) = self.aux.as_mut() {
            let mut values = Vec::with_capacity(aux.vars.len());
            for var in &aux.vars {
                values.push(format!("{:.6}", probe::resolve(sim, var)?));
            }
            writeln!(aux.out, "{}", values.join(","))?;
        }
        Ok(())
    }

    pub fn daily_header(&mut self, sim: &Simulation) -> Result<()> {
        self.header(&daily_record(sim))
    }

    pub fn daily_row(&mut self, sim: &Simulation) -> Result<()> {
        self.row(sim, &daily_record(sim))
    }

    pub fn hourly_header(&mut self, sim: &Simulation) -> Result<()> {
        self.header(&hourly_record(sim))
    }

    pub fn hourly_row(&mut self, sim: &Simulation) -> Result<()> {
        self.row(sim, &hourly_record(sim))
    }

    /// Flushes both sinks; called at the end of a run (drop also closes).
    pub fn finish(&mut self) -> Result<()> {
        self.out.flush()?;
        if let Some(aux) = self.aux.as_mut() {
            aux.out.flush()?;
        }
        Ok(())
    }
}

/// The daily output columns.
fn daily_record(sim: &Simulation) -> Vec<(String, Cell)> {
    let mut rec: Vec<(String, Cell)> = Vec::with_capacity(40 + sim.soil.layers.len() * 6);
    let mut push = |name: &str, cell: Cell| rec.push((name.to_string(), cell));

    let crop = &sim.crop;
    let ag_growth =
        crop.parts.pinnae.growth + crop.parts.rachis.growth + crop.parts.trunk.growth;
    push("age", Cell::Int(i64::from(crop.treeage)));
    push("doy", Cell::Int(i64::from(sim.meteo.doy)));
    push("tmin", Cell::Num(sim.meteo.daytmin));
    push("tmax", Cell::Num(sim.meteo.daytmax));
    push("totalrad", Cell::Num(sim.meteo.dayrad.total));
    push("directrad", Cell::Num(sim.meteo.dayrad.direct));
    push("diffuserad", Cell::Num(sim.meteo.dayrad.diffuse));
    push("wind", Cell::Num(sim.meteo.daywind));
    push("rain", Cell::Num(sim.meteo.dayrain));
    push("netrain", Cell::Num(sim.soil.netrain));
    push("runoff", Cell::Num(sim.soil.runoff));
    push("ambientCO2", Cell::Num(sim.photosyn.co2ambient));
    push("LAI", Cell::Num(crop.lai));
    push("pinnae", Cell::Num(crop.parts.pinnae.weight));
    push("rachis", Cell::Num(crop.parts.rachis.weight));
    push("trunk", Cell::Num(crop.parts.trunk.weight));
    push("roots", Cell::Num(crop.parts.roots.weight));
    push("male", Cell::Num(crop.parts.maleflo.weight));
    push("female", Cell::Num(crop.parts.femaflo.weight));
    push("bunches", Cell::Num(crop.parts.bunches.weight));
    push("flowersex", Cell::Int(i64::from(crop.flowersex.code())));
    push("VDM", Cell::Num(crop.vdmwgt));
    push("TDM", Cell::Num(crop.tdmwgt));
    push("assim_photosyn", Cell::Num(sim.photosyn.dayassim));
    push("assim_maint", Cell::Num(crop.assim4maint));
    push("assim_growth", Cell::Num(crop.assim4growth));
    push("assim_gen", Cell::Num(crop.assim4gen));
    push("VDM_growth", Cell::Num(ag_growth));
    push("TDM_growth", Cell::Num(ag_growth + crop.parts.roots.growth));
    push("yield", Cell::Num(crop.bunchyield));
    push("trunk_hgt", Cell::Num(crop.trunkhgt));
    push("rootdepth", Cell::Num(sim.soil.rootdepth));
    push("rootzone_VWC", Cell::Num(sim.soil.rootzone.vwc));
    push("waterstress", Cell::Num(sim.soil.stresses.crop));
    push("actual_E", Cell::Num(sim.soil.aet.soil));
    push("actual_T", Cell::Num(sim.soil.aet.crop));
    push("pot_T", Cell::Num(sim.energy.dayet.crop));
    for (i, layer) in sim.soil.layers.iter().enumerate() {
        let n = i + 1;
        rec.push((format!("layer{n}_VWC"), Cell::Num(layer.vwc)));
        rec.push((format!("layer{n}_influx"), Cell::Num(layer.fluxes.influx * 1000.0)));
        rec.push((format!("layer{n}_outflux"), Cell::Num(layer.fluxes.outflux * 1000.0)));
        rec.push((format!("layer{n}_netflux"), Cell::Num(layer.fluxes.netflux * 1000.0)));
        rec.push((format!("layer{n}_e"), Cell::Num(layer.fluxes.e * 1000.0)));
        rec.push((format!("layer{n}_t"), Cell::Num(layer.fluxes.t * 1000.0)));
    }
    rec
}

/// The hourly (instantaneous) output columns.
fn hourly_record(sim: &Simulation) -> Vec<(String, Cell)> {
    let mut rec: Vec<(String, Cell)> = Vec::with_capacity(64);
    let mut push = |name: &str, cell: Cell| rec.push((name.to_string(), cell));

    push("hour", Cell::Num(sim.meteo.solarhour));
    push("doy", Cell::Int(i64::from(sim.meteo.doy)));
    push("solarinc", Cell::Num(sim.meteo.solarpos.inc.to_degrees()));
    push("rad_et", Cell::Num(sim.meteo.etrad));
    push("rad_total", Cell::Num(sim.meteo.rad.total));
    push("rad_dr", Cell::Num(sim.meteo.rad.direct));
    push("rad_df", Cell::Num(sim.meteo.rad.diffuse));
    push("airtemp", Cell::Num(sim.meteo.airtemp));
    push("canopytemp", Cell::Num(sim.energy.canopytemp));
    push("svp", Cell::Num(sim.meteo.svp));
    push("vp", Cell::Num(sim.meteo.vp));
    push("vpd", Cell::Num(sim.meteo.vpd));
    push("rh", Cell::Num(sim.meteo.rh));
    push("u", Cell::Num(sim.meteo.windspd));
    push("co2internal", Cell::Num(sim.photosyn.co2internal));
    push("kdr", Cell::Num(sim.photosyn.extcoef.kdr));
    push("kdf", Cell::Num(sim.photosyn.extcoef.kdf));
    push("lai_sunlit", Cell::Num(sim.photosyn.laicomp.sunlit));
    push("lai_shaded", Cell::Num(sim.photosyn.laicomp.shaded));
    push("par_outdr", Cell::Num(sim.photosyn.par.outdr));
    push("par_outdf", Cell::Num(sim.photosyn.par.outdf));
    push("par_indrscatter", Cell::Num(sim.photosyn.par.indrscatter));
    push("par_inscatter", Cell::Num(sim.photosyn.par.inscatter));
    push("par_indf", Cell::Num(sim.photosyn.par.indf));
    push("par_abs_sunlit", Cell::Num(sim.photosyn.par.abssunlit));
    push("par_abs_shaded", Cell::Num(sim.photosyn.par.absshaded));
    push("mm_co2", Cell::Num(sim.photosyn.assimcoef.mmco2));
    push("mm_o2", Cell::Num(sim.photosyn.assimcoef.mmo2));
    push("specificity", Cell::Num(sim.photosyn.assimcoef.specificity));
    push("vcmax", Cell::Num(sim.photosyn.assimcoef.vcmax));
    push("co2pt", Cell::Num(sim.photosyn.assimcoef.co2pt));
    push("assim_vc", Cell::Num(sim.photosyn.leafassim.vc));
    push("assim_vqsl", Cell::Num(sim.photosyn.leafassim.vqsl));
    push("assim_vqsh", Cell::Num(sim.photosyn.leafassim.vqsh));
    push("assim_vs", Cell::Num(sim.photosyn.leafassim.vs));
    push("assim_sunlit", Cell::Num(sim.photosyn.leafassim.sunlit));
    push("assim_shaded", Cell::Num(sim.photosyn.leafassim.shaded));
    push("d", Cell::Num(sim.energy.d));
    push("z0", Cell::Num(sim.energy.z0));
    push("fn_water", Cell::Num(sim.energy.stressfn.water));
    push("fn_vpd", Cell::Num(sim.energy.stressfn.vpd));
    push("fn_par", Cell::Num(sim.energy.stressfn.par));
    push("a", Cell::Num(sim.energy.availegy.total));
    push("ac", Cell::Num(sim.energy.availegy.crop));
    push("as", Cell::Num(sim.energy.availegy.soil));
    push("rn", Cell::Num(sim.energy.availegy.net));
    push("g", Cell::Num(sim.energy.availegy.g));
    push("ustar", Cell::Num(sim.energy.ustar));
    push("uh", Cell::Num(sim.energy.ucrophgt));
    push("rsa", Cell::Num(sim.energy.res.rsa));
    push("raa", Cell::Num(sim.energy.res.raa));
    push("rca", Cell::Num(sim.energy.res.rca));
    push("rst", Cell::Num(sim.energy.res.rst));
    push("rcs", Cell::Num(sim.energy.res.rcs));
    push("rss", Cell::Num(sim.energy.res.rss));
    push("et_total", Cell::Num(sim.energy.et.total));
    push("et_crop", Cell::Num(sim.energy.et.crop));
    push("et_soil", Cell::Num(sim.energy.et.soil));
    push("h_total", Cell::Num(sim.energy.h.total));
    push("h_crop", Cell::Num(sim.energy.h.crop));
    push("h_soil", Cell::Num(sim.energy.h.soil));
    rec
}
