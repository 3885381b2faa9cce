use crate::analysis::{AnalysisResponse, RiskReport};
use crate::ranker::{Candidate, SortKey};
use std::fmt;

// ──────────────────────────────────────────────────────────────────────────────
// Plain-text tables (the only place fractions become percentages)
// ──────────────────────────────────────────────────────────────────────────────

const RULE: &str = "════════════════════════════════════════════════════════════════════════";

fn percent(fraction: f64) -> f64 {
    fraction * 100.0
}

fn weights_cell(candidate: &Candidate) -> String {
    candidate
        .weights
        .as_slice()
        .iter()
        .map(|w| format!("{:>5.1}", percent(*w)))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Ranked allocation table, at most `limit` rows, with the nearest match and
/// market portfolio appended when they fall outside the shown rows.
pub struct AllocationTable<'a> {
    pub response: &'a AnalysisResponse,
    pub limit: usize,
}

impl AllocationTable<'_> {
    fn has_wealth(&self) -> bool {
        self.response
            .table
            .candidates
            .iter()
            .any(|c| c.terminal_wealth.is_some())
    }

    fn weights_width(&self) -> usize {
        self.response.table.symbols.len() * 6
    }

    fn row(&self, f: &mut fmt::Formatter<'_>, index: usize, candidate: &Candidate) -> fmt::Result {
        let response = self.response;
        let mut marker = String::new();
        if response.nearest.map(|n| n.index) == Some(index) {
            marker.push_str(" <- current");
        }
        if response.market_portfolio == Some(index) {
            marker.push_str(" <- market");
        }
        write!(
            f,
            "  {:>5}  {:<w$}  {:>+8.3}  {:>8.3}  {:>+8.3}  {:>12.2}",
            index + 1,
            weights_cell(candidate),
            percent(candidate.risk.expected_return),
            percent(candidate.risk.volatility),
            percent(candidate.risk.value_at_risk),
            candidate.risk.value_at_risk_amount,
            w = self.weights_width()
        )?;
        if self.has_wealth() {
            write!(f, "  {:>14.2}", candidate.terminal_wealth.unwrap_or(0.0))?;
        }
        writeln!(f, "  {:>6.3}{}", candidate.risk.sharpe_ratio, marker)
    }
}

impl fmt::Display for AllocationTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let response = self.response;
        let table = &response.table;
        let sort_label = match table.sort_key {
            SortKey::ValueAtRisk => "VaR %",
            SortKey::ValueAtRiskAmount => "VaR amount",
        };

        writeln!(f, "\n╔{}╗", RULE)?;
        writeln!(f, "  Allocation frontier: {}", table.symbols.join(", "))?;
        if let (Some(start), Some(end)) = (response.start_date, response.end_date) {
            writeln!(
                f,
                "  Sessions {} .. {}  ({} return periods)",
                start, end, response.periods
            )?;
        }
        writeln!(
            f,
            "  {} candidates, sorted by {} (ascending)",
            table.len(),
            sort_label
        )?;
        writeln!(f, "╠{}╣", RULE)?;

        write!(
            f,
            "  {:>5}  {:<w$}  {:>8}  {:>8}  {:>8}  {:>12}",
            "#",
            "Weights %",
            "E[R] %",
            "Vol %",
            "VaR %",
            "VaR amount",
            w = self.weights_width()
        )?;
        if self.has_wealth() {
            write!(f, "  {:>14}", "Terminal")?;
        }
        writeln!(f, "  Sharpe")?;
        writeln!(f, "╠{}╣", RULE)?;

        for (index, candidate) in table.candidates.iter().enumerate().take(self.limit) {
            self.row(f, index, candidate)?;
        }
        if table.len() > self.limit {
            writeln!(f, "  {:>5}", "...")?;
        }
        let mut shown = Vec::new();
        let hidden = [response.nearest.map(|n| n.index), response.market_portfolio];
        for index in hidden.into_iter().flatten().filter(|&i| i >= self.limit) {
            if shown.contains(&index) {
                continue;
            }
            if let Some(candidate) = table.get(index) {
                self.row(f, index, candidate)?;
            }
            shown.push(index);
        }

        if let Some(n) = response.nearest {
            writeln!(f, "╠{}╣", RULE)?;
            writeln!(
                f,
                "  Closest grid allocation to the current portfolio: row {} (distance {:.4})",
                n.index + 1,
                n.distance
            )?;
        }
        writeln!(f, "╚{}╝", RULE)
    }
}

/// Per-asset risk table with the simple-sum portfolio VaR.
pub struct RiskTable<'a>(pub &'a RiskReport);

impl fmt::Display for RiskTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        writeln!(f, "\n╔{}╗", RULE)?;
        writeln!(f, "  Single-asset risk against {}", report.benchmark)?;
        writeln!(f, "╠{}╣", RULE)?;
        writeln!(
            f,
            "  {:<10} {:>12} {:>8} {:>8} {:>8} {:>8} {:>8} {:>12} {:>7} {:>7} {:>7}",
            "Symbol",
            "Invested",
            "E[R] %",
            "Bench %",
            "Excess %",
            "Vol %",
            "VaR %",
            "VaR amount",
            "Sharpe",
            "Beta",
            "Corr"
        )?;
        writeln!(f, "╠{}╣", RULE)?;
        for asset in &report.assets {
            writeln!(
                f,
                "  {:<10} {:>12.2} {:>+8.3} {:>+8.3} {:>+8.3} {:>8.3} {:>+8.3} {:>12.2} {:>7.2} {:>7.2} {:>7.2}",
                asset.symbol,
                asset.contribution,
                percent(asset.mean_return),
                percent(asset.benchmark_mean_return),
                percent(asset.excess_mean_return),
                percent(asset.volatility),
                percent(asset.value_at_risk),
                asset.value_at_risk_amount,
                asset.sharpe_ratio,
                asset.beta,
                asset.correlation
            )?;
        }
        writeln!(f, "╠{}╣", RULE)?;
        writeln!(
            f,
            "  Portfolio VaR (simple sum): {:.2}",
            report.total_value_at_risk_amount
        )?;
        writeln!(f, "╚{}╝", RULE)
    }
}

pub fn render_allocation(response: &AnalysisResponse, limit: usize) -> String {
    AllocationTable { response, limit }.to_string()
}

pub fn render_risk_report(report: &RiskReport) -> String {
    RiskTable(report).to_string()
}

pub fn print_allocation(response: &AnalysisResponse, limit: usize) {
    print!("{}", AllocationTable { response, limit });
}

pub fn print_risk_report(report: &RiskReport) {
    print!("{}", RiskTable(report));
}
