use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::CUMULATIVE_DAYS;
use crate::sim::meteo::Meteo;

/// Descriptive statistics of one weather parameter for one month (or the
/// whole year), as (name, value) pairs so print order is stable.
type StatList = Vec<(&'static str, f64)>;

/// No-data marker, matching the source model's convention.
const MISSING: f64 = -999.0;

/// Start and end day indices of a month (0-11), or the whole year (12).
fn month_slice(month: usize) -> (usize, usize) {
    let start = if month == 0 || month == 12 {
        0
    } else {
        CUMULATIVE_DAYS[month - 1] as usize
    };
    let end = if month == 12 {
        365
    } else {
        CUMULATIVE_DAYS[month] as usize
    };
    (start, end)
}

/// Count, total, min, max, mean, amplitude, sd and cv of a series.
fn basic_stats(values: &[f64], exclude_zero: bool) -> StatList {
    let data: Vec<f64> = if exclude_zero {
        values.iter().copied().filter(|&v| v > 0.0).collect()
    } else {
        values.to_vec()
    };
    let n = data.len();
    let (total, avg, mn, mx, amp, sd, cv);
    if n > 0 {
        total = data.iter().sum::<f64>();
        avg = total / n as f64;
        mn = data.iter().cloned().fold(f64::INFINITY, f64::min);
        mx = data.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        amp = mx - avg;
        if n > 1 {
            let ss: f64 = data.iter().map(|v| (v - avg) * (v - avg)).sum();
            sd = (ss / (n - 1) as f64).sqrt();
            cv = if avg != 0.0 { sd / avg } else { MISSING };
        } else {
            sd = MISSING;
            cv = MISSING;
        }
    } else {
        total = MISSING;
        avg = MISSING;
        mn = MISSING;
        mx = MISSING;
        amp = MISSING;
        sd = MISSING;
        cv = MISSING;
    }
    vec![
        ("count", n as f64),
        ("total", total),
        ("min", mn),
        ("max", mx),
        ("avg", avg),
        ("amp", amp),
        ("sd", sd),
        ("cv", cv),
    ]
}

/// Wet/dry day counts and the transition probabilities of the rain series.
fn rain_probs(rain: &[f64]) -> StatList {
    let numdays = rain.len();
    let (mut nwd, mut nww, mut nd) = (0usize, 0usize, 0usize);
    for day in 0..numdays.saturating_sub(1) {
        let wet1 = rain[day] > 0.0;
        let wet2 = rain[day + 1] > 0.0;
        if !wet1 && wet2 {
            nwd += 1;
        }
        if wet1 && wet2 {
            nww += 1;
        }
        if !wet1 {
            nd += 1;
        }
        if day + 1 == numdays - 1 && !wet2 {
            nd += 1;
        }
    }
    let nw = numdays - nd;
    let pwd = if nd > 0 { nwd as f64 / nd as f64 } else { 0.0 };
    let pww = if nw > 0 { nww as f64 / nw as f64 } else { 0.0 };
    vec![
        ("wetdays", nw as f64),
        ("drydays", nd as f64),
        ("p(w|d)", pwd),
        ("p(d|w)", 1.0 - pww),
        ("p(w|w)", pww),
        ("p(d|d)", 1.0 - pwd),
        ("p(w)", nw as f64 / numdays as f64),
        ("p(d)", nd as f64 / numdays as f64),
    ]
}

/// Two-parameter gamma fit to the nonzero rain amounts (location fixed at
/// zero), via Thom's closed-form maximum-likelihood approximation.
fn fit_gamma(rain: &[f64]) -> StatList {
    let x: Vec<f64> = rain.iter().copied().filter(|&v| v > 0.0).collect();
    let (shape, scale) = if x.len() > 1 {
        let n = x.len() as f64;
        let mean = x.iter().sum::<f64>() / n;
        let mean_ln = x.iter().map(|v| v.ln()).sum::<f64>() / n;
        let a = (mean.ln() - mean_ln).max(1e-9);
        let shape = (1.0 + (1.0 + 4.0 * a / 3.0).sqrt()) / (4.0 * a);
        (shape, mean / shape)
    } else {
        (MISSING, MISSING)
    };
    vec![("gamma_shape", shape), ("gamma_scale", scale)]
}

/// Two-parameter Weibull fit to the wind speeds: Newton-style fixed-point on
/// the shape MLE equation from a moment-based start.
fn fit_weibull(wind: &[f64]) -> StatList {
    let x: Vec<f64> = wind.iter().copied().filter(|&v| v > 0.0).collect();
    if x.len() < 2 {
        return vec![("weibull_shape", MISSING), ("weibull_scale", MISSING)];
    }
    let n = x.len() as f64;
    let mean = x.iter().sum::<f64>() / n;
    let sd = {
        let ss: f64 = x.iter().map(|v| (v - mean) * (v - mean)).sum();
        (ss / (n - 1.0)).sqrt()
    };
    let mean_ln = x.iter().map(|v| v.ln()).sum::<f64>() / n;

    // moment start, then iterate 1/k = sum(x^k ln x)/sum(x^k) - mean(ln x)
    let mut k = if sd > 0.0 {
        (mean / sd).powf(1.086)
    } else {
        2.0
    }
    .clamp(0.1, 20.0);
    for _ in 0..50 {
        let sum_k: f64 = x.iter().map(|v| v.powf(k)).sum();
        let sum_k_ln: f64 = x.iter().map(|v| v.powf(k) * v.ln()).sum();
        let rhs = sum_k_ln / sum_k - mean_ln;
        if rhs <= 0.0 {
            break;
        }
        let next = (1.0 / rhs).clamp(0.1, 20.0);
        if (next - k).abs() < 1e-9 {
            k = next;
            break;
        }
        k = next;
    }
    let scale = (x.iter().map(|v| v.powf(k)).sum::<f64>() / n).powf(1.0 / k);
    vec![("weibull_shape", k), ("weibull_scale", scale)]
}

/// One year of daily weather pulled through the meteorology (the radiation
/// components are model-derived, the rest comes from the annual table).
fn annual_weather(met: &mut Meteo) -> Result<Vec<(String, Vec<f64>)>> {
    let saved_doy = met.doy;
    let fields: Vec<String> = met.annual().fields().to_vec();
    let mut series: Vec<(String, Vec<f64>)> = fields
        .iter()
        .map(|f| (f.clone(), vec![0.0; 365]))
        .collect();
    series.push(("totrad".to_string(), vec![0.0; 365]));
    series.push(("drrad".to_string(), vec![0.0; 365]));
    series.push(("dfrad".to_string(), vec![0.0; 365]));

    for day in 0..365 {
        met.seek_day(day as u32 + 1)?;
        for (name, values) in series.iter_mut() {
            values[day] = match name.as_str() {
                "totrad" => met.dayrad.total,
                "drrad" => met.dayrad.direct,
                "dfrad" => met.dayrad.diffuse,
                field => met.annual().value(field, day)?,
            };
        }
    }
    met.seek_day(saved_doy)?;
    Ok(series)
}

/// Computes and writes the weather record and its statistics for every year
/// the source can produce. The main file carries the daily table and a
/// month-by-month summary; a companion `-raw` CSV carries the bare numbers.
pub fn output_stats(met: &mut Meteo, fname: impl AsRef<Path>, append: bool) -> Result<()> {
    let fname = fname.as_ref();
    let raw_name = raw_file_name(fname);

    let years = met.source_mut().total_years();
    for year in 1..=years {
        if years > 1 {
            met.source_mut().refresh_year(year)?;
            met.nyears = year as u32;
            met.seek_day(met.doy)?;
        }
        let series = annual_weather(met)?;
        let append_main = append || year > 1;
        write_year(met.nyears, &series, fname, &raw_name, append_main)?;
    }
    Ok(())
}

fn raw_file_name(fname: &Path) -> PathBuf {
    let stem = fname.file_stem().and_then(|s| s.to_str()).unwrap_or("stats");
    match fname.extension().and_then(|e| e.to_str()) {
        Some(ext) => fname.with_file_name(format!("{stem}-raw.{ext}")),
        None => fname.with_file_name(format!("{stem}-raw")),
    }
}

fn stats_for(series: &[(String, Vec<f64>)], month: usize) -> Vec<(String, StatList)> {
    let (s, e) = month_slice(month);
    let mut out = Vec::new();
    for (name, values) in series {
        let window = &values[s..e];
        let mut stats = basic_stats(window, name == "rain");
        if name == "rain" {
            stats.extend(rain_probs(window));
            stats.extend(fit_gamma(window));
        }
        if name == "wind" {
            stats.extend(fit_weibull(window));
        }
        out.push((name.clone(), stats));
    }
    out
}

fn write_year(
    year: u32,
    series: &[(String, Vec<f64>)],
    fname: &Path,
    raw_name: &Path,
    append: bool,
) -> Result<()> {
    let open = |path: &Path| -> Result<BufWriter<std::fs::File>> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)
            .with_context(|| format!("cannot open {}", path.display()))?;
        Ok(BufWriter::new(file))
    };

    let monthly: Vec<Vec<(String, StatList)>> = (0..13).map(|m| stats_for(series, m)).collect();

    let mut out = open(fname)?;
    writeln!(out, "## Year no. {year}:")?;
    let names: Vec<&str> = series.iter().map(|(n, _)| n.as_str()).collect();
    writeln!(out, "doy,{}", names.join(","))?;
    for day in 0..365 {
        let row: Vec<String> = series
            .iter()
            .map(|(_, v)| format!("{:.3}", v[day]))
            .collect();
        writeln!(out, "{},{}", day + 1, row.join(","))?;
    }

    writeln!(out, "\nSUMMARY OF EACH MONTH AND WHOLE YEAR:")?;
    let month_heads: Vec<String> = (1..=12).map(|m| format!("MONTH {m}")).collect();
    writeln!(out, "PARAM,STAT,{},ALL", month_heads.join(","))?;
    for (pi, (param, _)) in monthly[0].iter().enumerate() {
        for (si, (stat, _)) in monthly[0][pi].1.iter().enumerate() {
            let row: Vec<String> = (0..13)
                .map(|m| format!("{:.3}", monthly[m][pi].1[si].1))
                .collect();
            writeln!(out, "{param},{stat},{}", row.join(","))?;
        }
        writeln!(out)?;
    }
    out.flush()?;

    // companion raw CSV: one row per month, one column per param_stat
    let mut raw = open(raw_name)?;
    if !append {
        let mut header = vec!["year".to_string(), "month".to_string()];
        for (param, stats) in &monthly[0] {
            for (stat, _) in stats {
                header.push(format!("{param}_{stat}"));
            }
        }
        writeln!(raw, "{}", header.join(","))?;
    }
    for (m, month_stats) in monthly.iter().enumerate() {
        let mut row = vec![year.to_string(), (m + 1).to_string()];
        for (_, stats) in month_stats {
            for (_, value) in stats {
                row.push(format!("{value:.4}"));
            }
        }
        writeln!(raw, "{}", row.join(","))?;
    }
    raw.flush()?;
    Ok(())
}
