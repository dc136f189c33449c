//! Inequality measures and hypothesis tests over the aggregated tables.
//!
//! The distribution functions needed for p-values (Student t, chi-square) are computed
//! from the regularized incomplete beta and gamma functions.

use std::f64::consts::PI;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::StatisticsConfig;
use crate::domain::DonorTier;
use crate::error::{EtlError, Result};

// ---------------------------------------------------------------------------
// Inequality
// ---------------------------------------------------------------------------

fn check_distribution(values: &[f64], statistic: &str) -> Result<f64> {
    if values.is_empty() {
        return Err(EtlError::StatisticUndefined(format!("{}: no values", statistic)));
    }
    if let Some(bad) = values.iter().find(|v| !v.is_finite() || **v < 0.0) {
        return Err(EtlError::StatisticUndefined(format!("{}: negative or non-finite value {}", statistic, bad)));
    }
    let total: f64 = values.iter().sum();
    if total <= 0.0 {
        return Err(EtlError::StatisticUndefined(format!("{}: total is zero", statistic)));
    }
    Ok(total)
}

fn sorted_ascending(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

/// Gini coefficient: `2·Σ i·x_i / (n·Σx) − (n+1)/n` over values sorted ascending (1-based i)
pub fn gini(values: &[f64]) -> Result<f64> {
    let total = check_distribution(values, "gini")?;
    let sorted = sorted_ascending(values);
    let n = sorted.len() as f64;
    let weighted: f64 = sorted.iter().enumerate().map(|(i, x)| (i as f64 + 1.0) * x).sum();
    let g = 2.0 * weighted / (n * total) - (n + 1.0) / n;
    Ok(g.clamp(0.0, 1.0))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct LorenzPoint {
    /// Cumulative share of entities, 0-100
    pub population_pct: f64,
    /// Cumulative share of the total amount, 0-100
    pub amount_pct: f64,
}

/// Lorenz curve from (0,0) to (100,100); at most `max_points` points, endpoints always kept
pub fn lorenz_curve(values: &[f64], max_points: usize) -> Result<Vec<LorenzPoint>> {
    let total = check_distribution(values, "lorenz_curve")?;
    let sorted = sorted_ascending(values);
    let n = sorted.len() as f64;

    let mut points = Vec::with_capacity(sorted.len() + 1);
    points.push(LorenzPoint { population_pct: 0.0, amount_pct: 0.0 });
    let mut cumulative = 0.0;
    for (i, value) in sorted.iter().enumerate() {
        cumulative += value;
        points.push(LorenzPoint {
            population_pct: 100.0 * (i as f64 + 1.0) / n,
            amount_pct: (100.0 * cumulative / total).min(100.0),
        });
    }
    // Pin the last point against rounding drift
    if let Some(last) = points.last_mut() {
        *last = LorenzPoint { population_pct: 100.0, amount_pct: 100.0 };
    }

    let max_points = max_points.max(2);
    if points.len() <= max_points {
        return Ok(points);
    }
    let last = points.len() - 1;
    let mut sampled: Vec<LorenzPoint> = Vec::with_capacity(max_points);
    let mut previous = None;
    for k in 0..max_points {
        let idx = ((k as f64) * (last as f64) / ((max_points - 1) as f64)).round() as usize;
        if previous != Some(idx) {
            sampled.push(points[idx]);
            previous = Some(idx);
        }
    }
    Ok(sampled)
}

/// Share of the total held by the top `fraction` of entities (at least one entity)
pub fn top_share(values: &[f64], fraction: f64) -> Result<f64> {
    let total = check_distribution(values, "top_share")?;
    if !(fraction > 0.0 && fraction <= 1.0) {
        return Err(EtlError::StatisticUndefined(format!("top_share: fraction {} out of range", fraction)));
    }
    let mut sorted = sorted_ascending(values);
    sorted.reverse();
    let k = ((sorted.len() as f64 * fraction).ceil() as usize).clamp(1, sorted.len());
    Ok(sorted[..k].iter().sum::<f64>() / total)
}

// ---------------------------------------------------------------------------
// Hypothesis tests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestOutcome {
    pub statistic: f64,
    pub degrees_of_freedom: f64,
    pub p_value: f64,
    pub reject_null: bool,
}

fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var)
}

/// Welch's unequal-variance two-sample t-test, two-sided
pub fn welch_t_test(a: &[f64], b: &[f64], alpha: f64) -> Result<TestOutcome> {
    if a.len() < 2 || b.len() < 2 {
        return Err(EtlError::StatisticUndefined(format!(
            "welch_t_test: need at least 2 values per group (got {} and {})",
            a.len(),
            b.len()
        )));
    }
    let (mean_a, var_a) = mean_and_variance(a);
    let (mean_b, var_b) = mean_and_variance(b);
    let se_a = var_a / a.len() as f64;
    let se_b = var_b / b.len() as f64;
    let se2 = se_a + se_b;
    if !(se2 > 0.0) || !se2.is_finite() {
        return Err(EtlError::StatisticUndefined("welch_t_test: both groups have zero variance".to_string()));
    }
    let t = (mean_a - mean_b) / se2.sqrt();
    let df = se2.powi(2) / (se_a.powi(2) / (a.len() as f64 - 1.0) + se_b.powi(2) / (b.len() as f64 - 1.0));
    let p_value = student_t_two_sided(t, df);
    Ok(TestOutcome { statistic: t, degrees_of_freedom: df, p_value, reject_null: p_value < alpha })
}

/// Uniform expectation with the same total as `observed`
pub fn uniform_expected(observed: &[f64]) -> Vec<f64> {
    let total: f64 = observed.iter().sum();
    let k = observed.len().max(1) as f64;
    vec![total / k; observed.len()]
}

/// Pearson chi-square goodness of fit with `k − 1` degrees of freedom
pub fn chi_square_goodness_of_fit(observed: &[f64], expected: &[f64], alpha: f64) -> Result<TestOutcome> {
    if observed.len() != expected.len() || observed.len() < 2 {
        return Err(EtlError::StatisticUndefined(format!(
            "chi_square: need two or more matching categories (got {} observed, {} expected)",
            observed.len(),
            expected.len()
        )));
    }
    if expected.iter().any(|e| !(*e > 0.0)) {
        return Err(EtlError::StatisticUndefined("chi_square: expected counts must be positive".to_string()));
    }
    if observed.iter().any(|o| *o < 0.0) || observed.iter().sum::<f64>() <= 0.0 {
        return Err(EtlError::StatisticUndefined("chi_square: no observations".to_string()));
    }
    let statistic: f64 = observed.iter().zip(expected).map(|(o, e)| (o - e).powi(2) / e).sum();
    let df = (observed.len() - 1) as f64;
    let p_value = chi_square_survival(statistic, df);
    Ok(TestOutcome { statistic, degrees_of_freedom: df, p_value, reject_null: p_value < alpha })
}

// ---------------------------------------------------------------------------
// Special functions
// ---------------------------------------------------------------------------

const EPS: f64 = 1e-14;
const TINY: f64 = 1e-300;
const MAX_ITER: usize = 500;

/// ln Γ(x), Lanczos approximation (g = 7)
fn ln_gamma(x: f64) -> f64 {
    const COEF: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        return (PI / (PI * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let t = x + 7.5;
    let mut series = COEF[0];
    for (i, c) in COEF.iter().enumerate().skip(1) {
        series += c / (x + i as f64);
    }
    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + series.ln()
}

fn beta_continued_fraction(x: f64, a: f64, b: f64) -> f64 {
    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut h = d;
    for m in 1..=MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;
        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < EPS {
            break;
        }
    }
    h
}

/// Regularized incomplete beta I_x(a, b)
fn regularized_beta(x: f64, a: f64, b: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(x, a, b) / a
    } else {
        1.0 - front * beta_continued_fraction(1.0 - x, b, a) / b
    }
}

/// Regularized upper incomplete gamma Q(a, x)
fn upper_gamma_q(a: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 1.0;
    }
    let ln_front = -x + a * x.ln() - ln_gamma(a);
    if x < a + 1.0 {
        let mut ap = a;
        let mut delta = 1.0 / a;
        let mut sum = delta;
        for _ in 0..MAX_ITER {
            ap += 1.0;
            delta *= x / ap;
            sum += delta;
            if delta.abs() < sum.abs() * EPS {
                break;
            }
        }
        (1.0 - sum * ln_front.exp()).clamp(0.0, 1.0)
    } else {
        let mut b = x + 1.0 - a;
        let mut c = 1.0 / TINY;
        let mut d = 1.0 / b;
        let mut h = d;
        for i in 1..=MAX_ITER {
            let i = i as f64;
            let an = -i * (i - a);
            b += 2.0;
            d = an * d + b;
            if d.abs() < TINY {
                d = TINY;
            }
            c = b + an / c;
            if c.abs() < TINY {
                c = TINY;
            }
            d = 1.0 / d;
            let delta = d * c;
            h *= delta;
            if (delta - 1.0).abs() < EPS {
                break;
            }
        }
        (ln_front.exp() * h).clamp(0.0, 1.0)
    }
}

/// P(|T| ≥ |t|) for Student's t with `df` degrees of freedom
fn student_t_two_sided(t: f64, df: f64) -> f64 {
    if !t.is_finite() {
        return 0.0;
    }
    regularized_beta(df / (df + t * t), df / 2.0, 0.5).clamp(0.0, 1.0)
}

/// P(X ≥ x) for chi-square with `df` degrees of freedom
fn chi_square_survival(x: f64, df: f64) -> f64 {
    upper_gamma_q(df / 2.0, x / 2.0)
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// What the statistics engine needs from the aggregated tables
#[derive(Debug, Clone, Default)]
pub struct StatisticsInput {
    /// Net total and tier of every donor
    pub donor_totals: Vec<(DonorTier, f64)>,
    pub super_connected_donors: usize,
    /// Contribution counts for Q1..Q4 (rows with unknown dates left out)
    pub quarterly_counts: [u64; 4],
    pub dem_candidate_totals: Vec<f64>,
    pub rep_candidate_totals: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct InequalityMetric {
    pub metric: &'static str,
    pub value: Option<f64>,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct HypothesisTestRow {
    pub hypothesis: &'static str,
    pub test: &'static str,
    pub statistic: Option<f64>,
    pub degrees_of_freedom: Option<f64>,
    pub p_value: Option<f64>,
    pub significance_level: f64,
    pub reject_null: Option<bool>,
    /// `completed` or `skipped`
    pub status: &'static str,
    pub note: String,
}

impl HypothesisTestRow {
    fn from_outcome(hypothesis: &'static str, test: &'static str, alpha: f64, outcome: Result<TestOutcome>) -> Self {
        crate::metrics::statistics::test_run(test);
        match outcome {
            Ok(o) => Self {
                hypothesis,
                test,
                statistic: Some(o.statistic),
                degrees_of_freedom: Some(o.degrees_of_freedom),
                p_value: Some(o.p_value),
                significance_level: alpha,
                reject_null: Some(o.reject_null),
                status: "completed",
                note: String::new(),
            },
            Err(e) => {
                warn!("{} skipped: {}", test, e);
                crate::metrics::statistics::undefined(test);
                Self {
                    hypothesis,
                    test,
                    statistic: None,
                    degrees_of_freedom: None,
                    p_value: None,
                    significance_level: alpha,
                    reject_null: None,
                    status: "skipped",
                    note: e.to_string(),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatisticsReport {
    pub inequality: Vec<InequalityMetric>,
    pub lorenz: Vec<LorenzPoint>,
    pub tests: Vec<HypothesisTestRow>,
}

fn metric(name: &'static str, value: Result<f64>) -> InequalityMetric {
    match value {
        Ok(v) => InequalityMetric { metric: name, value: Some(v), note: String::new() },
        Err(e) => {
            crate::metrics::statistics::undefined(name);
            InequalityMetric { metric: name, value: None, note: e.to_string() }
        }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Compute every inequality metric and hypothesis test; undefined results are reported,
/// never fatal
#[instrument(skip_all)]
pub fn compute_statistics(input: &StatisticsInput, config: &StatisticsConfig) -> StatisticsReport {
    let alpha = config.significance_level;
    let negative = input.donor_totals.iter().filter(|(_, v)| *v < 0.0).count();
    if negative > 0 {
        warn!("{} donors with a negative net total left out of inequality measures", negative);
    }
    let totals: Vec<f64> = input.donor_totals.iter().map(|(_, v)| *v).filter(|v| *v >= 0.0).collect();
    let grand_total: f64 = totals.iter().sum();

    let tier_values = |wanted: &[DonorTier]| -> Vec<f64> {
        input
            .donor_totals
            .iter()
            .filter(|(tier, v)| wanted.contains(tier) && *v >= 0.0)
            .map(|(_, v)| *v)
            .collect()
    };
    let mega = tier_values(&[DonorTier::Mega]);
    let small = tier_values(&[DonorTier::Small, DonorTier::Nano]);

    let megadonor_control = if grand_total > 0.0 {
        Ok(100.0 * mega.iter().sum::<f64>() / grand_total)
    } else {
        Err(EtlError::StatisticUndefined("megadonor_control_pct: total is zero".to_string()))
    };
    let voice_ratio = match (mean(&mega), mean(&small)) {
        (Some(m), Some(s)) if s > 0.0 => Ok(m / s),
        _ => Err(EtlError::StatisticUndefined(
            "voice_inequality_ratio: needs Mega donors and a positive Small/Nano mean".to_string(),
        )),
    };

    let inequality = vec![
        metric("gini_coefficient", gini(&totals)),
        metric("top_1pct_share_pct", top_share(&totals, 0.01).map(|s| s * 100.0)),
        metric("top_5pct_share_pct", top_share(&totals, 0.05).map(|s| s * 100.0)),
        metric("top_10pct_share_pct", top_share(&totals, 0.10).map(|s| s * 100.0)),
        metric("top_25pct_share_pct", top_share(&totals, 0.25).map(|s| s * 100.0)),
        metric("megadonor_control_pct", megadonor_control),
        metric("voice_inequality_ratio", voice_ratio),
        metric("super_connected_donors", Ok(input.super_connected_donors as f64)),
        metric("donors_excluded_negative_total", Ok(negative as f64)),
    ];

    let lorenz = match lorenz_curve(&totals, config.lorenz_points) {
        Ok(points) => points,
        Err(e) => {
            warn!("Lorenz curve undefined: {}", e);
            crate::metrics::statistics::undefined("lorenz_curve");
            Vec::new()
        }
    };

    let tier_counts: Vec<f64> = DonorTier::DESCENDING
        .iter()
        .map(|tier| input.donor_totals.iter().filter(|(t, _)| t == tier).count() as f64)
        .collect();
    let quarterly: Vec<f64> = input.quarterly_counts.iter().map(|c| *c as f64).collect();

    let tests = vec![
        HypothesisTestRow::from_outcome(
            "H1: Oligarchic Concentration",
            "chi_square_donor_tiers",
            alpha,
            chi_square_goodness_of_fit(&tier_counts, &uniform_expected(&tier_counts), alpha),
        ),
        HypothesisTestRow::from_outcome(
            "H2: Strategic Timing",
            "chi_square_quarterly",
            alpha,
            chi_square_goodness_of_fit(&quarterly, &uniform_expected(&quarterly), alpha),
        ),
        HypothesisTestRow::from_outcome(
            "H3: Partisan Asymmetry",
            "welch_t_dem_vs_rep",
            alpha,
            welch_t_test(&input.dem_candidate_totals, &input.rep_candidate_totals, alpha),
        ),
    ];

    info!(
        "Statistics: {} inequality metrics, {} Lorenz points, {} of {} tests completed",
        inequality.len(),
        lorenz.len(),
        tests.iter().filter(|t| t.status == "completed").count(),
        tests.len()
    );
    StatisticsReport { inequality, lorenz, tests }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn test_gini_known_values() {
        assert!(close(gini(&[100.0, 900.0, 0.0]).unwrap(), 0.6, 1e-12));
        assert_eq!(gini(&[50.0, 50.0]).unwrap(), 0.0);
        assert_eq!(gini(&[7.0, 7.0, 7.0, 7.0]).unwrap(), 0.0);
    }

    #[test]
    fn test_gini_undefined_inputs() {
        assert!(matches!(gini(&[]), Err(EtlError::StatisticUndefined(_))));
        assert!(matches!(gini(&[0.0, 0.0]), Err(EtlError::StatisticUndefined(_))));
        assert!(matches!(gini(&[10.0, -1.0]), Err(EtlError::StatisticUndefined(_))));
    }

    #[test]
    fn test_gini_stays_in_unit_interval() {
        let g = gini(&[0.0, 0.0, 0.0, 1_000_000.0]).unwrap();
        assert!((0.0..=1.0).contains(&g));
        assert!(close(g, 0.75, 1e-12));
    }

    #[test]
    fn test_lorenz_endpoints_monotone_and_under_diagonal() {
        let values = [100.0, 900.0, 0.0, 250.0, 4000.0];
        let curve = lorenz_curve(&values, 101).unwrap();
        assert_eq!(curve.first(), Some(&LorenzPoint { population_pct: 0.0, amount_pct: 0.0 }));
        assert_eq!(curve.last(), Some(&LorenzPoint { population_pct: 100.0, amount_pct: 100.0 }));
        for pair in curve.windows(2) {
            assert!(pair[1].population_pct >= pair[0].population_pct);
            assert!(pair[1].amount_pct >= pair[0].amount_pct);
        }
        for p in &curve {
            assert!(p.amount_pct <= p.population_pct + 1e-9);
        }
    }

    #[test]
    fn test_lorenz_downsampling_keeps_endpoints() {
        let values: Vec<f64> = (1..=1000).map(|v| v as f64).collect();
        let curve = lorenz_curve(&values, 11).unwrap();
        assert_eq!(curve.len(), 11);
        assert_eq!(curve[0].population_pct, 0.0);
        assert_eq!(curve[10].population_pct, 100.0);
        assert_eq!(curve[10].amount_pct, 100.0);
    }

    #[test]
    fn test_top_share() {
        let values = [1.0, 1.0, 1.0, 97.0];
        assert!(close(top_share(&values, 0.25).unwrap(), 0.97, 1e-12));
        // at least one entity even for tiny fractions
        assert!(close(top_share(&values, 0.01).unwrap(), 0.97, 1e-12));
        assert!(close(top_share(&values, 1.0).unwrap(), 1.0, 1e-12));
    }

    #[test]
    fn test_student_t_critical_value() {
        // t = 2.228 at 10 df is the two-sided 5% critical value
        assert!(close(student_t_two_sided(2.228, 10.0), 0.05, 1e-3));
        assert!(close(student_t_two_sided(0.0, 5.0), 1.0, 1e-12));
    }

    #[test]
    fn test_chi_square_critical_value() {
        // 7.815 at 3 df is the 5% critical value
        assert!(close(chi_square_survival(7.815, 3.0), 0.05, 1e-3));
        assert!(close(chi_square_survival(0.0, 3.0), 1.0, 1e-12));
    }

    #[test]
    fn test_welch_t_test() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0];
        let b = [2.0, 4.0, 6.0, 8.0, 10.0];
        let outcome = welch_t_test(&a, &b, 0.05).unwrap();
        assert!(close(outcome.statistic, -1.897_366_6, 1e-6));
        assert!(close(outcome.degrees_of_freedom, 5.882_352_9, 1e-6));
        assert!(outcome.p_value > 0.10 && outcome.p_value < 0.115);
        assert!(!outcome.reject_null);
    }

    #[test]
    fn test_welch_t_test_degenerate_inputs() {
        assert!(matches!(welch_t_test(&[1.0], &[1.0, 2.0], 0.05), Err(EtlError::StatisticUndefined(_))));
        assert!(matches!(welch_t_test(&[3.0, 3.0], &[3.0, 3.0], 0.05), Err(EtlError::StatisticUndefined(_))));
    }

    #[test]
    fn test_chi_square_goodness_of_fit() {
        let uniform = [10.0, 10.0, 10.0, 10.0];
        let outcome = chi_square_goodness_of_fit(&uniform, &uniform_expected(&uniform), 0.05).unwrap();
        assert_eq!(outcome.statistic, 0.0);
        assert!(!outcome.reject_null);

        let skewed = [30.0, 10.0, 10.0, 10.0];
        let outcome = chi_square_goodness_of_fit(&skewed, &uniform_expected(&skewed), 0.05).unwrap();
        assert!(close(outcome.statistic, 20.0, 1e-12));
        assert_eq!(outcome.degrees_of_freedom, 3.0);
        assert!(outcome.p_value < 0.001);
        assert!(outcome.reject_null);
    }

    #[test]
    fn test_chi_square_without_observations_is_undefined() {
        let empty = [0.0, 0.0, 0.0, 0.0];
        assert!(matches!(
            chi_square_goodness_of_fit(&empty, &uniform_expected(&empty), 0.05),
            Err(EtlError::StatisticUndefined(_))
        ));
    }

    #[test]
    fn test_report_lists_top_share_bands() {
        let mut donor_totals = vec![(DonorTier::Nano, 1.0); 6];
        donor_totals.push((DonorTier::Nano, 4.0));
        donor_totals.push((DonorTier::Nano, 10.0));
        let input = StatisticsInput {
            donor_totals,
            super_connected_donors: 0,
            quarterly_counts: [1, 1, 1, 1],
            dem_candidate_totals: vec![],
            rep_candidate_totals: vec![],
        };
        let report = compute_statistics(&input, &StatisticsConfig::default());
        let value = |name: &str| report.inequality.iter().find(|m| m.metric == name).unwrap().value.unwrap();

        assert!(close(value("top_1pct_share_pct"), 50.0, 1e-9));
        assert!(close(value("top_10pct_share_pct"), 50.0, 1e-9));
        assert!(close(value("top_25pct_share_pct"), 70.0, 1e-9));
    }

    #[test]
    fn test_report_skips_degenerate_tests() {
        let input = StatisticsInput {
            donor_totals: vec![(DonorTier::Small, 900.0), (DonorTier::Nano, 100.0), (DonorTier::Nano, 0.0)],
            super_connected_donors: 0,
            quarterly_counts: [0, 0, 0, 2],
            dem_candidate_totals: vec![1000.0],
            rep_candidate_totals: vec![],
        };
        let report = compute_statistics(&input, &StatisticsConfig::default());

        let gini_row = report.inequality.iter().find(|m| m.metric == "gini_coefficient").unwrap();
        assert!(close(gini_row.value.unwrap(), 0.6, 1e-12));
        let welch = report.tests.iter().find(|t| t.test == "welch_t_dem_vs_rep").unwrap();
        assert_eq!(welch.status, "skipped");
        assert!(welch.p_value.is_none());
        let quarterly = report.tests.iter().find(|t| t.test == "chi_square_quarterly").unwrap();
        assert_eq!(quarterly.status, "completed");
        assert_eq!(report.lorenz.first().unwrap().amount_pct, 0.0);
    }
}
