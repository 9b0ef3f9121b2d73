//! Deterministic golden-ratio stride sampling.
//!
//! Row `r` is kept when the fractional part of `r * phi` is below `1 / N`.
//! Multiples of the golden-ratio conjugate are equidistributed modulo 1, so
//! for dense integer row ids this keeps very close to one row in `N`, spread
//! evenly over the whole range, and the same rows on every call.

use std::collections::HashMap;

use serde::Serialize;

/// Golden-ratio conjugate, `(sqrt(5) - 1) / 2`, to the precision the stored
/// series have always been sampled with.
pub const PHI: f64 = 0.618_033_988_75;

/// Whether row `row_id` survives sampling at rate `1 / filter_mod_n`.
///
/// Rates of one or less, and non-finite rates, keep every row.
#[allow(clippy::cast_precision_loss)]
pub fn keep_row(row_id: i64, filter_mod_n: f64) -> bool {
    if !filter_mod_n.is_finite() || filter_mod_n <= 1.0 {
        return true;
    }
    let scaled = row_id as f64 * PHI;
    scaled.fract() < 1.0 / filter_mod_n
}

/// A sampler with a fixed rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampler {
    filter_mod_n: f64,
}

impl Sampler {
    pub const fn new(filter_mod_n: f64) -> Self {
        Self { filter_mod_n }
    }

    pub fn keep(&self, row_id: i64) -> bool {
        keep_row(row_id, self.filter_mod_n)
    }

    /// Keep the items whose row id (from `row_id`) passes.
    pub fn filter<I, T, F>(self, rows: I, row_id: F) -> impl Iterator<Item = T>
    where
        I: IntoIterator<Item = T>,
        F: Fn(&T) -> i64,
    {
        rows.into_iter().filter(move |row| self.keep(row_id(row)))
    }
}

/// One plotted point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Point {
    pub x: String,
    pub y: f64,
}

/// Sampled rows grouped by series, in the shape the UI charts consume.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SampledSeries {
    pub series: Vec<String>,
    pub data: Vec<Vec<Point>>,
}

impl SampledSeries {
    pub fn points(&self, series: &str) -> Option<&[Point]> {
        let index = self.series.iter().position(|s| s == series)?;
        self.data.get(index).map(Vec::as_slice)
    }
}

/// Groups points by series key in first-seen order, rounding `y`.
#[derive(Debug)]
pub struct SeriesBuilder {
    scale: f64,
    index: HashMap<String, usize>,
    out: SampledSeries,
}

impl SeriesBuilder {
    /// `precision` is the number of decimal places kept on `y`.
    pub fn new(precision: u8) -> Self {
        Self {
            scale: 10f64.powi(i32::from(precision)),
            index: HashMap::new(),
            out: SampledSeries::default(),
        }
    }

    pub fn push(&mut self, series: &str, x: impl Into<String>, y: f64) {
        let slot = match self.index.get(series) {
            Some(&i) => i,
            None => {
                let i = self.out.series.len();
                self.index.insert(series.to_string(), i);
                self.out.series.push(series.to_string());
                self.out.data.push(Vec::new());
                i
            }
        };
        let point = Point {
            x: x.into(),
            y: (y * self.scale).round() / self.scale,
        };
        self.out.data[slot].push(point);
    }

    pub fn finish(self) -> SampledSeries {
        self.out
    }
}
