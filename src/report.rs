use crate::recorder::Recorder;
use crate::runner::RunMap;

/// Summary statistics for one benchmark variant, recomputed from the
/// run-level collection on every report.
#[derive(Debug, Clone)]
pub struct AggregateRow {
    pub benchmark: String,
    pub count: usize,
    pub mean_ms: f64,
    pub sd_ms: f64,
    pub median_ms: f64,
    /// Requested quantiles in request order, as (quantile, value-ms) pairs.
    pub quantiles_ms: Vec<(f64, f64)>,
}

/// Aggregates one variant's recorders: failed trials are excluded, then any
/// remaining trial whose TTFT is not finite (no token ever arrived).
pub fn aggregate(benchmark_id: &str, recorders: &[Recorder], quantiles: &[f64]) -> AggregateRow {
    let samples = recorders
        .iter()
        .filter(|r| !r.failed())
        .map(|r| r.ttft())
        .filter(|v| v.is_finite())
        .collect();
    aggregate_samples(benchmark_id, samples, quantiles)
}

pub(crate) fn aggregate_samples(
    benchmark_id: &str,
    mut samples: Vec<f64>,
    quantiles: &[f64],
) -> AggregateRow {
    samples.sort_by(f64::total_cmp);

    let count = samples.len();
    let mean_ms = if count > 0 {
        samples.iter().sum::<f64>() / count as f64
    } else {
        f64::NAN
    };
    let sd_ms = sample_sd(&samples, mean_ms);
    let quantiles_ms = quantiles
        .iter()
        .map(|&q| (q, quantile_sorted(&samples, q)))
        .collect();

    AggregateRow {
        benchmark: benchmark_id.to_string(),
        count,
        mean_ms,
        sd_ms,
        median_ms: quantile_sorted(&samples, 0.5),
        quantiles_ms,
    }
}

fn sample_sd(samples: &[f64], mean: f64) -> f64 {
    if samples.len() < 2 {
        return f64::NAN;
    }
    let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>()
        / (samples.len() - 1) as f64;
    variance.sqrt()
}

/// Averaging empirical-CDF quantile over a sorted sample: for 0 < p < 1 with
/// h = n * p, the mean of the two adjacent order statistics when h lands on
/// an integer, otherwise the ceil(h)-th order statistic. p = 0 and p = 1
/// return the extremes. NaN on an empty sample.
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }

    let p = p.clamp(0.0, 1.0);
    if p == 0.0 {
        return sorted[0];
    }
    if p == 1.0 {
        return sorted[sorted.len() - 1];
    }

    let h = sorted.len() as f64 * p;
    let upper = h.ceil() as usize;
    if h.fract() == 0.0 {
        (sorted[upper - 1] + sorted[upper]) / 2.0
    } else {
        sorted[upper - 1]
    }
}

/// Renders the summary table: one row per variant sorted by median
/// ascending (NaN medians last, ties broken by id), the median column in
/// green. Pure in the collection, so repeated calls on an unchanged run
/// yield identical output.
pub fn render_summary(run: &RunMap, quantiles: &[f64]) -> String {
    let mut rows: Vec<AggregateRow> = run
        .iter()
        .map(|(id, recorders)| aggregate(id, recorders, quantiles))
        .collect();
    rows.sort_by(|a, b| {
        a.median_ms
            .total_cmp(&b.median_ms)
            .then_with(|| a.benchmark.cmp(&b.benchmark))
    });

    let mut header = vec!["Benchmark".to_string(), "Count".to_string()];
    header.extend(quantiles.iter().map(|&q| quantile_label(q)));

    let mut cells = vec![header];
    for row in &rows {
        let mut line = vec![row.benchmark.clone(), row.count.to_string()];
        line.extend(row.quantiles_ms.iter().map(|&(_, v)| fmt_ms(v)));
        cells.push(line);
    }

    let columns = cells[0].len();
    let mut widths = vec![0; columns];
    for line in &cells {
        for (i, cell) in line.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let median_column = quantiles.iter().position(|&q| q == 0.5).map(|i| i + 2);

    let mut out = String::new();
    for line in &cells {
        let mut rendered = Vec::with_capacity(columns);
        for (i, cell) in line.iter().enumerate() {
            let padded = format!("{:<width$}", cell, width = widths[i]);
            if Some(i) == median_column {
                rendered.push(green(&padded));
            } else {
                rendered.push(padded);
            }
        }
        out.push_str(rendered.join("  ").trim_end());
        out.push('\n');
    }

    out.push_str("\nvalues represent time-to-first-token (TTFT) in milliseconds\n");
    out
}

fn quantile_label(q: f64) -> String {
    if q == 0.0 {
        return "Min".to_string();
    }
    if q == 0.5 {
        return "Median".to_string();
    }
    if q == 1.0 {
        return "Max".to_string();
    }

    let pct = q * 100.0;
    if pct.fract() == 0.0 {
        format!("p{}", pct as u32)
    } else {
        format!("p{}", pct)
    }
}

fn fmt_ms(value: f64) -> String {
    if value.is_finite() {
        format!("{:.1}", value)
    } else {
        "NaN".to_string()
    }
}

fn green(s: &str) -> String {
    format!("\x1b[32m{}\x1b[0m", s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::Recorder;
    use std::collections::HashMap;

    const REFERENCE: [f64; 5] = [10.0, 20.0, 30.0, 40.0, 100.0];

    #[test]
    fn quantiles_match_the_reference_sample() {
        assert_eq!(quantile_sorted(&REFERENCE, 0.0), 10.0);
        assert_eq!(quantile_sorted(&REFERENCE, 0.25), 20.0);
        assert_eq!(quantile_sorted(&REFERENCE, 0.5), 30.0);
        assert_eq!(quantile_sorted(&REFERENCE, 0.75), 40.0);
        assert_eq!(quantile_sorted(&REFERENCE, 0.95), 100.0);
        assert_eq!(quantile_sorted(&REFERENCE, 0.99), 100.0);
        assert_eq!(quantile_sorted(&REFERENCE, 1.0), 100.0);
    }

    #[test]
    fn integer_rank_averages_adjacent_order_statistics() {
        let sorted = [10.0, 20.0, 30.0, 40.0];
        assert_eq!(quantile_sorted(&sorted, 0.5), 25.0);
        assert_eq!(quantile_sorted(&sorted, 0.25), 15.0);
    }

    #[test]
    fn empty_sample_quantile_is_nan() {
        assert!(quantile_sorted(&[], 0.5).is_nan());
    }

    #[test]
    fn mean_and_sample_sd_over_the_reference_sample() {
        let row = aggregate_samples("bm", REFERENCE.to_vec(), &[0.5]);
        assert_eq!(row.count, 5);
        assert_eq!(row.mean_ms, 40.0);
        assert!((row.sd_ms - 1250.0_f64.sqrt()).abs() < 1e-9);
        assert_eq!(row.median_ms, 30.0);
    }

    #[test]
    fn sd_is_nan_below_two_samples() {
        assert!(aggregate_samples("bm", vec![10.0], &[0.5]).sd_ms.is_nan());
        assert!(aggregate_samples("bm", Vec::new(), &[0.5]).mean_ms.is_nan());
    }

    fn finished(id: &str) -> Recorder {
        let mut rec = Recorder::new(id, "example.com", "p");
        rec.begin();
        rec.add_token(Some("tok"));
        rec.end();
        rec
    }

    fn failed(id: &str) -> Recorder {
        let mut rec = Recorder::new(id, "example.com", "p");
        rec.begin();
        rec.set_error("boom");
        rec.end();
        rec
    }

    fn tokenless(id: &str) -> Recorder {
        let mut rec = Recorder::new(id, "example.com", "p");
        rec.begin();
        rec.end();
        rec
    }

    #[test]
    fn aggregate_excludes_failed_and_non_finite_trials() {
        let recorders = vec![
            finished("bm"),
            finished("bm"),
            failed("bm"),
            tokenless("bm"),
            finished("bm"),
        ];
        let row = aggregate("bm", &recorders, &[0.5]);
        assert_eq!(row.count, 3);
    }

    #[test]
    fn rendering_is_idempotent_and_tolerates_zero_samples() {
        let mut run: RunMap = HashMap::new();
        run.insert("warm".to_string(), vec![finished("warm")]);
        run.insert("empty".to_string(), Vec::new());

        let quantiles = [0.0, 0.5, 1.0];
        let first = render_summary(&run, &quantiles);
        let second = render_summary(&run, &quantiles);
        assert_eq!(first, second);

        assert!(first.contains("NaN"));
        assert!(first.contains("Median"));
        assert!(first.contains("time-to-first-token"));
    }

    #[test]
    fn rows_sort_by_median_with_nan_last() {
        let mut run: RunMap = HashMap::new();
        run.insert("empty".to_string(), Vec::new());
        run.insert("warm".to_string(), vec![finished("warm")]);

        let rendered = render_summary(&run, &[0.5]);
        let warm_pos = rendered.find("warm").unwrap();
        let empty_pos = rendered.find("empty").unwrap();
        assert!(warm_pos < empty_pos);
    }
}
