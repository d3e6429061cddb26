//! Index time series, station rainfall and chart descriptions.
//!
//! # CSV formats
//!
//! - **Index series** (written, with headers): `region,date,<INDEX>...`
//! - **Station rainfall** (read, with headers): `date,value`, dates as `YYYY-MM-DD`

use std::collections::BTreeMap;
use std::io::{Read, Write};

use anyhow::Context;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::stats::Statistic;
use crate::time::DateRange;

/// Mean index values for one region on one scene date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRow {
    pub region: String,
    pub date: NaiveDate,
    pub values: BTreeMap<String, f64>,
}

/// Rows for a fixed set of columns, ordered by date then region.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexSeries {
    pub columns: Vec<String>,
    pub rows: Vec<SeriesRow>,
    /// Rows dropped because a column had no data.
    pub dropped: usize,
}

impl IndexSeries {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            dropped: 0,
        }
    }

    /// Adds a row unless any column is missing or has no data.
    pub fn push(&mut self, region: &str, date: NaiveDate, stats: &BTreeMap<String, Statistic>) -> bool {
        let mut values = BTreeMap::new();
        for column in &self.columns {
            match stats.get(column).and_then(Statistic::value) {
                Some(value) => {
                    values.insert(column.clone(), value);
                }
                None => {
                    log::debug!("Dropping {region} on {date}: no {column} value");
                    self.dropped += 1;
                    return false;
                }
            }
        }

        let at = self
            .rows
            .partition_point(|row| (row.date, row.region.as_str()) <= (date, region));
        self.rows.insert(
            at,
            SeriesRow {
                region: region.to_string(),
                date,
                values,
            },
        );
        true
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> anyhow::Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        let mut header = vec!["region".to_string(), "date".to_string()];
        header.extend(self.columns.iter().cloned());
        wtr.write_record(&header)?;

        for row in &self.rows {
            let mut record = vec![row.region.clone(), row.date.to_string()];
            record.extend(
                self.columns
                    .iter()
                    .map(|column| row.values.get(column).map_or(String::new(), |v| v.to_string())),
            );
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// One line per column over date, for a single region.
    pub fn line_chart(&self, region: &str, title: &str) -> ChartSpec {
        let rows: Vec<&SeriesRow> = self.rows.iter().filter(|row| row.region == region).collect();
        let series = self
            .columns
            .iter()
            .map(|column| ChartSeries {
                name: column.clone(),
                points: rows
                    .iter()
                    .filter_map(|row| row.values.get(column).map(|v| (row.date.to_string(), *v)))
                    .collect(),
            })
            .collect();

        ChartSpec {
            kind: ChartKind::Line,
            title: title.to_string(),
            x_label: "Date".to_string(),
            y_label: "Index Values".to_string(),
            series,
        }
    }

    /// Every row as a table, one series per column keyed by `region date`.
    pub fn table(&self, title: &str) -> ChartSpec {
        let series = self
            .columns
            .iter()
            .map(|column| ChartSeries {
                name: column.clone(),
                points: self
                    .rows
                    .iter()
                    .filter_map(|row| {
                        row.values
                            .get(column)
                            .map(|v| (format!("{} {}", row.region, row.date), *v))
                    })
                    .collect(),
            })
            .collect();

        ChartSpec {
            kind: ChartKind::Table,
            title: title.to_string(),
            x_label: "region / date".to_string(),
            y_label: String::new(),
            series,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Line,
    Column,
    Table,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub name: String,
    pub points: Vec<(String, f64)>,
}

/// Renderer-agnostic chart description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub series: Vec<ChartSeries>,
}

impl ChartSpec {
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RainfallRecord {
    pub date: NaiveDate,
    /// Millimetres.
    pub value: f64,
}

/// Reads a station `date,value` CSV; rows with an empty value are skipped.
pub fn read_rainfall_csv<R: Read>(reader: R) -> anyhow::Result<Vec<RainfallRecord>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut records = Vec::new();
    for (line, result) in rdr.records().enumerate() {
        let r = result?;
        let date = r.get(0).unwrap_or("");
        let value = r.get(1).unwrap_or("");
        if value.is_empty() {
            log::debug!("Skipping rainfall row {}: no value", line + 1);
            continue;
        }
        records.push(RainfallRecord {
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .with_context(|| format!("rainfall row {}: bad date {date:?}", line + 1))?,
            value: value
                .parse()
                .with_context(|| format!("rainfall row {}: bad value {value:?}", line + 1))?,
        });
    }
    records.sort_by_key(|record| record.date);
    Ok(records)
}

/// Daily rainfall column chart for records inside `range`.
pub fn rainfall_chart(station: &str, records: &[RainfallRecord], range: &DateRange) -> ChartSpec {
    let points = records
        .iter()
        .filter(|record| range.contains(record.date))
        .map(|record| (record.date.to_string(), record.value))
        .collect();

    ChartSpec {
        kind: ChartKind::Column,
        title: format!(
            "{station} Daily Rainfall ({}-{})",
            range.start.year(),
            range.end.year()
        ),
        x_label: "Date".to_string(),
        y_label: "Rainfall (mm)".to_string(),
        series: vec![ChartSeries {
            name: "value".to_string(),
            points,
        }],
    }
}
