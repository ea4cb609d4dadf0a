//! Monthly result and DARF rendering
//!
//! Builds the tables shown by the CLI. Figures arrive fully computed; this
//! module only formats.

use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use crate::positions::TradeBucket;
use crate::tax::darf::{DarfObligation, ObligationState};
use crate::tax::monthly::MonthlyResult;
use crate::utils::format_decimal_br;

#[derive(Tabled)]
struct MonthlyRow {
    #[tabled(rename = "Month")]
    month: String,
    #[tabled(rename = "Bucket")]
    bucket: String,
    #[tabled(rename = "Sales")]
    sales: String,
    #[tabled(rename = "Net gain")]
    net_gain: String,
    #[tabled(rename = "Loss in")]
    loss_in: String,
    #[tabled(rename = "Compensated")]
    compensated: String,
    #[tabled(rename = "Loss out")]
    loss_out: String,
    #[tabled(rename = "Taxable")]
    taxable: String,
    #[tabled(rename = "Tax due")]
    tax_due: String,
    #[tabled(rename = "IRRF")]
    withheld: String,
    #[tabled(rename = "Payable")]
    payable: String,
    #[tabled(rename = "Status")]
    status: String,
}

/// Render the per-month, per-bucket table. Quiet bucket slices (no sales,
/// no balance movement) are omitted to keep the table readable.
pub fn monthly_results_table(results: &[MonthlyResult], color: bool) -> String {
    let mut rows = Vec::new();
    for result in results {
        for bucket in TradeBucket::ALL {
            let slice = result.bucket(bucket);
            let quiet = slice.sales_volume.is_zero()
                && slice.net_gain.is_zero()
                && slice.loss_carried_in == slice.loss_carried_out;
            if quiet {
                continue;
            }

            let net_gain = format_decimal_br(slice.net_gain);
            let net_gain = if !color {
                net_gain
            } else if slice.net_gain.is_sign_negative() {
                net_gain.as_str().red().to_string()
            } else {
                net_gain.as_str().green().to_string()
            };

            let mut status = slice.payment_status.to_string();
            if slice.exempt && bucket == TradeBucket::Swing {
                status = "exempt".to_string();
            }
            if slice.withholding_incomplete {
                status.push_str(" (IRRF?)");
            }

            rows.push(MonthlyRow {
                month: result.month.to_string(),
                bucket: bucket.to_string(),
                sales: format_decimal_br(slice.sales_volume),
                net_gain,
                loss_in: format_decimal_br(slice.loss_carried_in),
                compensated: format_decimal_br(slice.compensated),
                loss_out: format_decimal_br(slice.loss_carried_out),
                taxable: format_decimal_br(slice.taxable_profit),
                tax_due: format_decimal_br(slice.tax_due),
                withheld: format_decimal_br(slice.tax_withheld),
                payable: format_decimal_br(slice.tax_payable),
                status,
            });
        }
    }

    if rows.is_empty() {
        return "No closed positions in the period".to_string();
    }
    Table::new(rows).with(Style::rounded()).to_string()
}

#[derive(Tabled)]
struct DarfRow {
    #[tabled(rename = "Month")]
    month: String,
    #[tabled(rename = "Bucket")]
    bucket: String,
    #[tabled(rename = "Code")]
    code: String,
    #[tabled(rename = "Amount")]
    amount: String,
    #[tabled(rename = "Due date")]
    due_date: String,
    #[tabled(rename = "Status")]
    status: String,
}

/// Render the DARF obligations table. Waived amounts (under the minimum)
/// stay visible but are marked as not payable.
pub fn darf_table(obligations: &[DarfObligation]) -> String {
    if obligations.is_empty() {
        return "No DARF obligations in the period".to_string();
    }

    let rows: Vec<DarfRow> = obligations
        .iter()
        .map(|o| DarfRow {
            month: o.month.to_string(),
            bucket: o.bucket.to_string(),
            code: o.darf_code.to_string(),
            amount: format_decimal_br(o.amount),
            due_date: o.due_date.format("%d/%m/%Y").to_string(),
            status: match o.state {
                ObligationState::Waived => "waived (under minimum)".to_string(),
                ObligationState::Pending => "pending".to_string(),
                ObligationState::Paid => "paid".to_string(),
            },
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}
