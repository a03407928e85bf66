use std::io::Write;

use anyhow::{Context, Result};
use samlink::session::ShooterReport;
use samlink::transmission::Shot;
use serde::Serialize;

#[derive(Debug, Clone)]
pub enum Format {
    Csv,
    Json,
}

impl clap::ValueEnum for Format {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Csv, Self::Json]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::Csv => Some(clap::builder::PossibleValue::new("csv")),
            Self::Json => Some(clap::builder::PossibleValue::new("json")),
        }
    }
}

impl Format {
    pub fn default_filename(&self) -> &'static str {
        match self {
            Self::Csv => "report.csv",
            Self::Json => "report.json",
        }
    }
}

/// How ring scores enter the report.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreMode {
    /// Decimal ring values, decimal sums.
    Decimal,
    /// Truncated ring values, sums of the truncated values.
    Integer,
    /// Decimal ring values shown, but sums computed over truncated
    /// values.
    Mixed,
}

impl clap::ValueEnum for ScoreMode {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Decimal, Self::Integer, Self::Mixed]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::Decimal => Some(clap::builder::PossibleValue::new("decimal")),
            Self::Integer => Some(clap::builder::PossibleValue::new("integer")),
            Self::Mixed => Some(clap::builder::PossibleValue::new("mixed")),
        }
    }
}

impl ScoreMode {
    /// Value a shot shows in its own cell.
    fn cell(&self, shot: &Shot) -> f64 {
        let ring = shot.ring.unwrap_or(0.0);
        match self {
            Self::Decimal | Self::Mixed => ring,
            Self::Integer => ring.trunc(),
        }
    }

    /// Value a shot contributes to totals.
    fn scored(&self, shot: &Shot) -> f64 {
        let ring = shot.ring.unwrap_or(0.0);
        match self {
            Self::Decimal => ring,
            Self::Integer | Self::Mixed => ring.trunc(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
enum ShotKind {
    Normal,
    /// Operator override, no device measurement.
    Manual,
    Miss,
}

impl ShotKind {
    fn of(shot: &Shot) -> Self {
        if shot.is_miss() {
            Self::Miss
        } else if shot.is_manual() {
            Self::Manual
        } else {
            Self::Normal
        }
    }
}

#[derive(Debug, Serialize)]
struct ShotCell {
    score: f64,
    kind: ShotKind,
}

#[derive(Debug, Serialize)]
struct SeriesSummary {
    total: f64,
    shots: Vec<ShotCell>,
}

#[derive(Debug, Serialize)]
struct ShooterSummary {
    name: String,
    strips: usize,
    total: f64,
    series: Vec<SeriesSummary>,
}

#[derive(Debug, Serialize)]
struct Summary {
    mode: ScoreMode,
    shooters: Vec<ShooterSummary>,
}

fn summarize(reports: &[ShooterReport], mode: ScoreMode) -> Summary {
    let shooters = reports
        .iter()
        .map(|report| {
            let series: Vec<SeriesSummary> = report
                .series
                .iter()
                .map(|row| SeriesSummary {
                    total: row.iter().map(|s| mode.scored(s)).sum(),
                    shots: row
                        .iter()
                        .map(|s| ShotCell {
                            score: mode.cell(s),
                            kind: ShotKind::of(s),
                        })
                        .collect(),
                })
                .collect();
            ShooterSummary {
                name: report.name.clone(),
                strips: report.strips,
                total: series.iter().map(|s| s.total).sum(),
                series,
            }
        })
        .collect();
    Summary { mode, shooters }
}

/// Render per-shooter series tables to `out`.
pub fn render<W: Write>(
    reports: &[ShooterReport],
    mode: ScoreMode,
    format: &Format,
    out: W,
) -> Result<()> {
    let summary = summarize(reports, mode);
    match format {
        Format::Json => {
            serde_json::to_writer_pretty(out, &summary).context("writing json report")
        }
        Format::Csv => write_csv(&summary, out),
    }
}

/// One row per series: shooter, series index, one cell per shot, total.
/// Manual corrections are marked with a `*` suffix; misses score 0.
fn write_csv<W: Write>(summary: &Summary, out: W) -> Result<()> {
    let width = summary
        .shooters
        .iter()
        .flat_map(|s| s.series.iter())
        .map(|s| s.shots.len())
        .max()
        .unwrap_or(0);

    let mut wtr = csv::Writer::from_writer(out);
    let mut header = vec!["shooter".to_string(), "series".to_string()];
    header.extend((1..=width).map(|i| i.to_string()));
    header.push("total".to_string());
    wtr.write_record(&header).context("writing csv header")?;

    for shooter in &summary.shooters {
        for (idx, series) in shooter.series.iter().enumerate() {
            let mut row = vec![shooter.name.clone(), (idx + 1).to_string()];
            row.extend(series.shots.iter().map(format_cell));
            row.push(format_score(series.total));
            wtr.write_record(&row).context("writing csv row")?;
        }
        let mut row = vec![shooter.name.clone(), "total".to_string()];
        row.extend(std::iter::repeat(String::new()).take(width));
        row.push(format_score(shooter.total));
        wtr.write_record(&row).context("writing csv total row")?;
    }
    wtr.flush().context("flushing csv report")?;
    Ok(())
}

fn format_cell(cell: &ShotCell) -> String {
    match cell.kind {
        ShotKind::Manual => format!("{}*", format_score(cell.score)),
        _ => format_score(cell.score),
    }
}

fn format_score(score: f64) -> String {
    if score.fract() == 0.0 {
        format!("{score:.0}")
    } else {
        format!("{score:.1}")
    }
}
