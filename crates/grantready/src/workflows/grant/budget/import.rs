use std::io::Read;

use serde::{Deserialize, Deserializer};

use super::{CostCategory, LineItem};

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("line item export could not be read: {0}")]
    Csv(#[from] csv::Error),
    #[error("row {row}: unknown cost category '{value}'")]
    UnknownCategory { row: usize, value: String },
    #[error("row {row}: amount '{value}' is not a non-negative whole currency amount")]
    InvalidAmount { row: usize, value: String },
}

#[derive(Debug, Deserialize)]
struct LineItemRow {
    #[serde(rename = "Id", default, deserialize_with = "empty_string_as_none")]
    id: Option<String>,
    #[serde(rename = "Category")]
    category: String,
    #[serde(rename = "Description", default)]
    description: String,
    #[serde(rename = "Amount")]
    amount: String,
}

/// Read `Category,Description,Amount[,Id]` rows into budget line items.
pub fn line_items_from_csv<R: Read>(reader: R) -> Result<Vec<LineItem>, ImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut items = Vec::new();

    for (index, record) in csv_reader.deserialize::<LineItemRow>().enumerate() {
        let row = record?;
        let row_number = index + 1;

        let category =
            CostCategory::parse(&row.category).ok_or_else(|| ImportError::UnknownCategory {
                row: row_number,
                value: row.category.clone(),
            })?;
        let amount = parse_amount(&row.amount).ok_or_else(|| ImportError::InvalidAmount {
            row: row_number,
            value: row.amount.clone(),
        })?;

        items.push(LineItem {
            id: row.id.unwrap_or_else(|| format!("li-{row_number:03}")),
            category,
            description: row.description,
            amount,
        });
    }

    Ok(items)
}

fn parse_amount(raw: &str) -> Option<i64> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches('$')
        .chars()
        .filter(|ch| *ch != ',')
        .collect();
    let value = match cleaned.parse::<i64>() {
        Ok(value) => value,
        Err(_) => cleaned
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(|value| value.round() as i64)?,
    };
    (value >= 0).then_some(value)
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}
