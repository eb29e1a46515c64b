use chrono::{DateTime, FixedOffset, Utc};

/// Offset of Western Indonesian Time (UTC+7).
const WIB_OFFSET_SECS: i32 = 7 * 3600;

/// One sales check-in, written as a single spreadsheet row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalesRecord {
    pub timestamp: String,
    pub name: String,
    pub amount: i64,
}

impl SalesRecord {
    pub fn new(name: String, amount: i64, now: DateTime<Utc>) -> Self {
        Self {
            timestamp: format_timestamp(now),
            name,
            amount,
        }
    }

    /// Column values in sheet order: timestamp, name, amount.
    pub fn to_row(&self) -> Vec<serde_json::Value> {
        vec![
            serde_json::Value::from(self.timestamp.clone()),
            serde_json::Value::from(self.name.clone()),
            serde_json::Value::from(self.amount),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The text did not split into exactly `name, amount`.
    Format,
    /// The amount part is not a base-10 integer.
    Amount,
}

/// Parse `"<name>, <amount>"`. Exactly one comma is allowed; both parts are trimmed.
pub fn parse_message(text: &str) -> Result<(String, i64), ParseError> {
    let parts: Vec<&str> = text.split(',').collect();
    let [name, amount] = parts.as_slice() else {
        return Err(ParseError::Format);
    };

    let amount = amount
        .trim()
        .parse::<i64>()
        .map_err(|_| ParseError::Amount)?;

    Ok((name.trim().to_string(), amount))
}

pub fn wib() -> FixedOffset {
    FixedOffset::east_opt(WIB_OFFSET_SECS).expect("UTC+7 is within the valid offset range")
}

pub fn format_timestamp(now: DateTime<Utc>) -> String {
    now.with_timezone(&wib())
        .format("%Y-%m-%d %H:%M:%S WIB")
        .to_string()
}

/// Format an integer with `,` thousands separators, e.g. `1000000` -> `1,000,000`.
pub fn format_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
