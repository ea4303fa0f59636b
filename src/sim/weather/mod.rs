pub mod file;
pub mod generate;
pub mod stats;

use anyhow::Result;
use serde::Serialize;

pub use file::WeatherFile;
pub use generate::WeatherGenerator;

/// Cumulative number of days at the end of each month (non-leap year).
pub const CUMULATIVE_DAYS: [u32; 12] = [31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334, 365];

/// Zero-based month index for a day of year (January = 0).
pub fn month_of_doy(doy: u32) -> usize {
    CUMULATIVE_DAYS.iter().position(|&c| doy <= c).unwrap_or(11)
}

/// One year of weather data: `nsets` records of named fields.
///
/// Fields are weather parameters such as `tmin`, `tmax`, `wind` and `rain`;
/// records are usually daily, so a year holds 365 of them.
#[derive(Debug, Clone, Serialize)]
pub struct AnnualWeather {
    nsets: usize,
    fields: Vec<String>,
    table: Vec<Vec<f64>>,
}

impl AnnualWeather {
    pub fn new(nsets: usize, fields: &[&str]) -> Self {
        Self {
            nsets,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            table: vec![vec![0.0; nsets]; fields.len()],
        }
    }

    pub fn nsets(&self) -> usize {
        self.nsets
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    fn field_index(&self, field: &str) -> Result<usize> {
        self.fields
            .iter()
            .position(|f| f == field)
            .ok_or_else(|| anyhow::anyhow!("unknown weather field '{field}'"))
    }

    /// The full-year series for one field.
    pub fn series(&self, field: &str) -> Result<&[f64]> {
        Ok(&self.table[self.field_index(field)?])
    }

    /// A single value; `set` is the zero-based record index.
    pub fn value(&self, field: &str, set: usize) -> Result<f64> {
        let idx = self.field_index(field)?;
        anyhow::ensure!(
            set < self.nsets,
            "weather record {set} out of range (nsets = {})",
            self.nsets
        );
        Ok(self.table[idx][set])
    }

    pub fn set_value(&mut self, field: &str, set: usize, value: f64) -> Result<()> {
        let idx = self.field_index(field)?;
        self.table[idx][set] = value;
        Ok(())
    }
}

/// A source of annual weather: file-backed cyclic replay or stochastic
/// generation. Produces the table one year at a time.
pub trait WeatherSource {
    /// The current annual table.
    fn table(&self) -> &AnnualWeather;

    /// Re-materialises the table with the next year's data.
    fn refresh(&mut self) -> Result<()>;

    /// Re-materialises the table for a specific year number (1-based).
    fn refresh_year(&mut self, year: usize) -> Result<()>;

    /// Number of distinct years the source can produce before cycling.
    fn total_years(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_month_of_doy() {
        assert_eq!(month_of_doy(1), 0);
        assert_eq!(month_of_doy(31), 0);
        assert_eq!(month_of_doy(32), 1);
        assert_eq!(month_of_doy(365), 11);
    }

    #[test]
    fn test_annual_table_roundtrip() {
        let mut t = AnnualWeather::new(365, &["tmin", "rain"]);
        t.set_value("rain", 10, 5.5).unwrap();
        assert!((t.value("rain", 10).unwrap() - 5.5).abs() < 1e-12);
        assert!((t.value("tmin", 10).unwrap()).abs() < 1e-12);
        assert!(t.value("wind", 0).is_err());
        assert!(t.value("rain", 365).is_err());
    }
}
