use crate::config::TRADING_DAYS_PER_MONTH;

// ──────────────────────────────────────────────────────────────────────────────
// Terminal-wealth projection under periodic contributions
// ──────────────────────────────────────────────────────────────────────────────
// Each asset compounds independently at its mean period return:
// `c_{t+1} = (c_t + a) · (1 + r̄)`, starting from `c_0 = w · total` with
// `a = w · monthly`. The portfolio's terminal wealth is the sum across assets.

/// Contribution periods covered by `observations` daily sessions.
pub fn contribution_periods(observations: usize) -> usize {
    observations / TRADING_DAYS_PER_MONTH
}

/// Capital after `periods` contributions of `contribution`, compounding at `mean_return`.
pub fn project_terminal_capital(
    mean_return: f64,
    initial: f64,
    contribution: f64,
    periods: usize,
) -> f64 {
    (0..periods).fold(initial, |capital, _| (capital + contribution) * (1.0 + mean_return))
}

/// Sum of the per-asset projections for one weight vector.
pub fn project_portfolio_wealth(
    weights: &[f64],
    mean_returns: &[f64],
    total_contribution: f64,
    monthly_contribution: f64,
    periods: usize,
) -> f64 {
    weights
        .iter()
        .zip(mean_returns)
        .map(|(w, r)| {
            project_terminal_capital(*r, w * total_contribution, w * monthly_contribution, periods)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_rate_zero_contribution_keeps_capital() {
        assert_eq!(project_terminal_capital(0.0, 1000.0, 0.0, 12), 1000.0);
    }

    #[test]
    fn test_single_period_growth() {
        let c = project_terminal_capital(0.01, 1000.0, 0.0, 1);
        assert!((c - 1010.0).abs() < 1e-9);
    }

    #[test]
    fn test_contributions_compound() {
        // (1000 + 100) * 1.1 = 1210; (1210 + 100) * 1.1 = 1441
        let c = project_terminal_capital(0.1, 1000.0, 100.0, 2);
        assert!((c - 1441.0).abs() < 1e-9);
        // Without growth, contributions simply accumulate.
        assert_eq!(project_terminal_capital(0.0, 1000.0, 100.0, 5), 1500.0);
    }

    #[test]
    fn test_contribution_periods() {
        assert_eq!(contribution_periods(20), 0);
        assert_eq!(contribution_periods(21), 1);
        assert_eq!(contribution_periods(251), 11);
        assert_eq!(contribution_periods(252), 12);
    }

    #[test]
    fn test_portfolio_wealth_is_sum_of_assets() {
        let weights = [0.25, 0.75];
        let means = [0.01, 0.0];
        let total = project_portfolio_wealth(&weights, &means, 1000.0, 100.0, 1);
        let a = project_terminal_capital(0.01, 250.0, 25.0, 1);
        let b = project_terminal_capital(0.0, 750.0, 75.0, 1);
        assert!((total - (a + b)).abs() < 1e-9);
        assert!((b - 825.0).abs() < 1e-9);
    }
}
