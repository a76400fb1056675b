//! Text renderings of a benchmark report.

use crate::trials::{AucResult, BenchmarkReport, EstimatorSummary};

/// "mean ± std" in the fixed `%6.3f` layout, or "-" when missing.
pub fn format_auc(auc: Option<AucResult>) -> String {
    match auc {
        Some(r) => format!("{:6.3} ± {:6.3}", r.mean, r.std),
        None => "-".to_string(),
    }
}

/// `"<Name> & <p> & <n> & <mean> ± <std>"`.
pub fn summary_line(summary: &EstimatorSummary, p: usize, n: usize) -> String {
    format!("{} & {p} & {n} & {}", summary.label, format_auc(summary.auc))
}

/// One summary line per estimator, in configured order.
pub fn summary_lines(report: &BenchmarkReport) -> Vec<String> {
    report
        .summaries
        .iter()
        .map(|s| summary_line(s, report.config.p, report.config.n))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimators::EstimatorKind;

    fn summary(auc: Option<AucResult>) -> EstimatorSummary {
        EstimatorSummary {
            label: "Graphical Lasso".to_string(),
            kind: EstimatorKind::GraphicalLasso,
            auc,
            contributing: usize::from(auc.is_some()),
            missing: usize::from(auc.is_none()),
            operating_point: None,
        }
    }

    #[test]
    fn line_uses_fixed_width_statistics() {
        let line = summary_line(
            &summary(Some(AucResult {
                mean: 0.8124,
                std: 0.05,
            })),
            50,
            100,
        );
        assert_eq!(line, "Graphical Lasso & 50 & 100 &  0.812 ±  0.050");
    }

    #[test]
    fn missing_statistic_is_a_dash() {
        assert_eq!(summary_line(&summary(None), 5, 50), "Graphical Lasso & 5 & 50 & -");
    }
}
