use std::path::Path;

use anyhow::{Context, Result};

use super::{AnnualWeather, WeatherSource};

/// Weather file reader with cyclic replay.
///
/// Format: optional `#`-prefixed comment lines at the top, then a header line,
/// then one record per line, all comma- or semicolon-delimited. Header tokens
/// prefixed with `*` mark key columns (used for lookup, not stored as weather
/// fields); if no token is tagged, the first column is taken as the key. The
/// number of records must be a multiple of `nsets` (records per year). When
/// the last year block has been consumed, the reader rewinds to the first.
pub struct WeatherFile {
    table: AnnualWeather,
    headers: Vec<String>,
    keys: Vec<String>,
    records: Vec<Vec<String>>,
    pos: usize,
}

fn split_line(line: &str) -> Vec<String> {
    line.split(|c: char| c == ',' || c == ';')
        .map(|t| t.trim().to_string())
        .collect()
}

impl WeatherFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_nsets(path, 365)
    }

    pub fn open_with_nsets(path: impl AsRef<Path>, nsets: usize) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read weather file {}", path.display()))?;
        Self::parse(&content, nsets)
            .with_context(|| format!("cannot parse weather file {}", path.display()))
    }

    pub fn parse(content: &str, nsets: usize) -> Result<Self> {
        let mut lines = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .skip_while(|l| l.starts_with('#'));

        let header_line = lines.next().context("weather file has no header line")?;
        let mut headers = split_line(header_line);

        // identify key columns (tagged '*'); default to the first column
        let mut keys = Vec::new();
        for h in headers.iter_mut() {
            if let Some(stripped) = h.strip_prefix('*') {
                let stripped = stripped.to_string();
                keys.push(stripped.clone());
                *h = stripped;
            }
        }
        if keys.is_empty() {
            keys.push(headers[0].clone());
        }
        let fields: Vec<String> = headers
            .iter()
            .filter(|h| !keys.contains(h))
            .cloned()
            .collect();
        anyhow::ensure!(!fields.is_empty(), "weather file has no value columns");

        let mut records = Vec::new();
        for (i, line) in lines.enumerate() {
            let tokens = split_line(line);
            anyhow::ensure!(
                tokens.len() == headers.len(),
                "record {} has {} columns, header has {}",
                i + 1,
                tokens.len(),
                headers.len()
            );
            records.push(tokens);
        }
        anyhow::ensure!(!records.is_empty(), "weather file has no records");
        anyhow::ensure!(
            records.len() % nsets == 0,
            "number of records ({}) is not a multiple of nsets ({nsets})",
            records.len()
        );

        let field_refs: Vec<&str> = fields.iter().map(String::as_str).collect();
        let mut wf = Self {
            table: AnnualWeather::new(nsets, &field_refs),
            headers,
            keys,
            records,
            pos: 0,
        };
        wf.update(0)?;
        Ok(wf)
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Loads one year block into the annual table.
    ///
    /// `year > 0` seeks to that year's block (wrapping past the end);
    /// `year <= 0` reads the next block from the current position.
    pub fn update(&mut self, year: usize) -> Result<()> {
        if year > 0 {
            self.pos = ((year - 1) * self.table.nsets()) % self.records.len();
        }
        for set in 0..self.table.nsets() {
            let record = &self.records[self.pos];
            for (h, token) in self.headers.iter().zip(record.iter()) {
                if self.keys.contains(h) {
                    continue;
                }
                let value: f64 = token.parse().with_context(|| {
                    format!("non-numeric value '{token}' for field '{h}' in record {}", self.pos + 1)
                })?;
                self.table.set_value(h, set, value)?;
            }
            self.pos = (self.pos + 1) % self.records.len();
        }
        Ok(())
    }
}

impl WeatherSource for WeatherFile {
    fn table(&self) -> &AnnualWeather {
        &self.table
    }

    fn refresh(&mut self) -> Result<()> {
        self.update(0)
    }

    fn refresh_year(&mut self, year: usize) -> Result<()> {
        self.update(year)
    }

    fn total_years(&self) -> usize {
        self.records.len() / self.table.nsets()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(nyears: usize) -> String {
        let mut s = String::from("# comment line\n# another comment\n*doy,tmax,tmin,wind,rain\n");
        for y in 0..nyears {
            for d in 1..=5 {
                s.push_str(&format!(
                    "{d},{},{},{},{}\n",
                    30.0 + y as f64,
                    22.0 + y as f64,
                    1.0,
                    d as f64
                ));
            }
        }
        s
    }

    #[test]
    fn test_parse_and_fields() {
        let wf = WeatherFile::parse(&sample(1), 5).unwrap();
        assert_eq!(wf.keys(), &["doy".to_string()]);
        assert_eq!(wf.table().fields(), &["tmax", "tmin", "wind", "rain"]);
        assert!((wf.table().value("tmax", 0).unwrap() - 30.0).abs() < 1e-12);
        assert!((wf.table().value("rain", 4).unwrap() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_cyclic_replay() {
        let mut wf = WeatherFile::parse(&sample(2), 5).unwrap();
        assert_eq!(wf.total_years(), 2);
        assert!((wf.table().value("tmax", 0).unwrap() - 30.0).abs() < 1e-12);
        wf.refresh().unwrap();
        assert!((wf.table().value("tmax", 0).unwrap() - 31.0).abs() < 1e-12);
        // exhausted the last block: rewind to the first
        wf.refresh().unwrap();
        assert!((wf.table().value("tmax", 0).unwrap() - 30.0).abs() < 1e-12);
    }

    #[test]
    fn test_refresh_specific_year() {
        let mut wf = WeatherFile::parse(&sample(3), 5).unwrap();
        wf.refresh_year(2).unwrap();
        assert!((wf.table().value("tmin", 0).unwrap() - 23.0).abs() < 1e-12);
        wf.refresh_year(1).unwrap();
        assert!((wf.table().value("tmin", 0).unwrap() - 22.0).abs() < 1e-12);
    }

    #[test]
    fn test_untagged_header_takes_first_column_as_key() {
        let content = "doy,tmax,tmin,wind,rain\n1,30,22,1,0\n2,31,23,1,2\n";
        let wf = WeatherFile::parse(content, 2).unwrap();
        assert_eq!(wf.keys(), &["doy".to_string()]);
        assert_eq!(wf.table().fields().len(), 4);
    }

    #[test]
    fn test_record_count_must_tile_years() {
        let content = "*doy,tmax\n1,30\n2,31\n3,32\n";
        assert!(WeatherFile::parse(content, 2).is_err());
    }

    #[test]
    fn test_non_numeric_field_rejected() {
        let content = "*doy,tmax\n1,hot\n";
        assert!(WeatherFile::parse(content, 1).is_err());
    }
}
