//! Summary statistics, percentage change and trend fitting over the
//! primary production series.

use leasedrop_core::{
    Extraction, StatisticRow, Statistics, Trend, TrendDirection, TrendPoint, TrendReport,
};

/// Slopes at or below this magnitude count as flat.
pub const FLAT_SLOPE_EPSILON: f64 = 1e-9;

/// Count, mean, median, min, max and sample standard deviation.
///
/// An empty series has count 0 and every other field null; the standard
/// deviation is null below two values.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn summarize(values: &[f64]) -> Statistics {
    if values.is_empty() {
        return Statistics::default();
    }
    let count = values.len();
    let n = count as f64;
    let mean = values.iter().sum::<f64>() / n;

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let middle = count / 2;
    let median = if count % 2 == 0 {
        (sorted[middle - 1] + sorted[middle]) / 2.0
    } else {
        sorted[middle]
    };

    let stddev = (count >= 2).then(|| {
        let squares: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
        (squares / (n - 1.0)).sqrt()
    });

    Statistics {
        count,
        mean: Some(mean),
        median: Some(median),
        min: sorted.first().copied(),
        max: sorted.last().copied(),
        stddev,
    }
}

/// `(last - first) / first * 100`; null below two values or when the
/// first value is zero.
#[must_use]
pub fn percentage_change(values: &[f64]) -> Option<f64> {
    match values {
        [first, .., last] if *first != 0.0 => Some((last - first) / first * 100.0),
        _ => None,
    }
}

/// Why [`percentage_change`] is null, if it is.
#[must_use]
pub fn percentage_change_note(values: &[f64]) -> Option<String> {
    match values {
        [] | [_] => Some(format!(
            "Not enough data points to calculate percentage change ({} row{})",
            values.len(),
            if values.len() == 1 { "" } else { "s" }
        )),
        [first, ..] if *first == 0.0 => {
            Some("First production value is zero; percentage change is undefined".to_string())
        }
        _ => None,
    }
}

/// Least-squares fit of value against chronological index.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn trend(values: &[f64]) -> Option<Trend> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / n;

    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for (index, value) in values.iter().enumerate() {
        let dx = index as f64 - x_mean;
        let dy = value - y_mean;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }

    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;
    let r_value = if syy == 0.0 {
        0.0
    } else {
        sxy / (sxx * syy).sqrt()
    };
    let direction = if slope.abs() <= FLAT_SLOPE_EPSILON {
        TrendDirection::Flat
    } else if slope > 0.0 {
        TrendDirection::Increasing
    } else {
        TrendDirection::Decreasing
    };

    Some(Trend {
        direction,
        strength: r_value.abs(),
        slope,
        intercept,
        r_value,
    })
}

/// `[{Statistic, Value}]` rows in display order.
#[must_use]
pub fn statistics_table(stats: &Statistics) -> Vec<StatisticRow> {
    stats.to_table()
}

/// Per-row changes, moving averages and the overall fit, in source order.
#[must_use]
pub fn trend_report(extraction: &Extraction) -> TrendReport {
    let series: Vec<(&str, f64)> = extraction
        .rows
        .iter()
        .filter_map(|row| {
            row.value(&extraction.production_column)
                .map(|value| (row.period.as_str(), value))
        })
        .collect();
    let values: Vec<f64> = series.iter().map(|(_, value)| *value).collect();
    let first = values.first().copied().unwrap_or_default();

    let points = series
        .iter()
        .enumerate()
        .map(|(index, (period, value))| {
            let previous = index.checked_sub(1).map(|i| values[i]);
            let monthly_change = previous.map(|p| value - p);
            let cumulative_change = value - first;
            TrendPoint {
                period: (*period).to_string(),
                value: *value,
                previous,
                monthly_change,
                monthly_pct_change: previous
                    .zip(monthly_change)
                    .and_then(|(p, change)| ratio_pct(change, p)),
                cumulative_change,
                cumulative_pct_change: ratio_pct(cumulative_change, first),
                moving_avg_3: moving_average(&values, index, 3),
                moving_avg_6: moving_average(&values, index, 6),
            }
        })
        .collect();

    TrendReport {
        production_column: extraction.production_column.clone(),
        date_column: extraction.date_column.clone(),
        trend: trend(&values),
        points,
    }
}

fn ratio_pct(change: f64, base: f64) -> Option<f64> {
    (base != 0.0).then(|| change / base * 100.0)
}

#[allow(clippy::cast_precision_loss)]
fn moving_average(values: &[f64], index: usize, window: usize) -> Option<f64> {
    let start = (index + 1).checked_sub(window)?;
    let slice = &values[start..=index];
    Some(slice.iter().sum::<f64>() / window as f64)
}
