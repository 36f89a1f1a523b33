// Report tree normalizer
//
// QuickBooks reports arrive as a column list plus a recursive row tree:
// - `Columns.Column[]` descriptors carry the column title
// - `Rows.Row[]` nodes carry cells (`ColData`), child rows (`Rows`), or both
// - sections wrap their children with `Header` and `Summary` cell rows
//
// The tree is decoded into `RowNode` first, then walked pre-order into
// header-aligned rows.

use serde::Serialize;
use serde_json::Value;

/// Title fields checked per column, highest priority first
pub const COLUMN_TITLE_FIELDS: [&str; 3] = ["ColTitle", "ColumnLabel", "ColLabel"];

/// A decoded row node
#[derive(Debug, Clone, PartialEq)]
pub enum RowNode {
    /// Data row
    Leaf(Vec<Value>),
    /// Section or summary container
    Branch(Vec<RowNode>),
    /// Data row that also holds child rows
    Both(Vec<Value>, Vec<RowNode>),
    /// Nothing usable (wrong type or no cells/children)
    Empty,
}

impl RowNode {
    /// Decode one row node from loosely structured JSON
    pub fn decode(node: &Value) -> RowNode {
        let Some(obj) = node.as_object() else {
            tracing::debug!("Skipping non-object row node: {}", node);
            return RowNode::Empty;
        };

        let cells = obj.get("ColData").and_then(cells_from);

        let mut children = Vec::new();
        if let Some(header) = obj.get("Header").and_then(|h| h.get("ColData")).and_then(cells_from) {
            children.push(RowNode::Leaf(header));
        }
        children.extend(Self::decode_collection(obj.get("Rows")));
        if let Some(summary) = obj
            .get("Summary")
            .and_then(|s| s.get("ColData"))
            .and_then(cells_from)
        {
            children.push(RowNode::Leaf(summary));
        }

        match (cells, children.is_empty()) {
            (Some(cells), true) => RowNode::Leaf(cells),
            (Some(cells), false) => RowNode::Both(cells, children),
            (None, false) => RowNode::Branch(children),
            (None, true) => RowNode::Empty,
        }
    }

    /// Decode a `Rows` collection
    ///
    /// Accepts `{"Row": [...]}`, a single `{"Row": {...}}`, or a bare array.
    pub fn decode_collection(rows: Option<&Value>) -> Vec<RowNode> {
        let list = match rows {
            Some(Value::Object(obj)) => obj.get("Row"),
            Some(array @ Value::Array(_)) => Some(array),
            _ => None,
        };

        match list {
            Some(Value::Array(items)) => items.iter().map(RowNode::decode).collect(),
            Some(single @ Value::Object(_)) => vec![RowNode::decode(single)],
            _ => Vec::new(),
        }
    }

    /// Pre-order walk: own cells first, then every child
    fn collect_rows(&self, out: &mut Vec<Vec<Value>>) {
        match self {
            RowNode::Leaf(cells) => out.push(cells.clone()),
            RowNode::Branch(children) => {
                for child in children {
                    child.collect_rows(out);
                }
            }
            RowNode::Both(cells, children) => {
                out.push(cells.clone());
                for child in children {
                    child.collect_rows(out);
                }
            }
            RowNode::Empty => {}
        }
    }
}

/// Cell scalars from a `ColData` array; other cell metadata is dropped
fn cells_from(col_data: &Value) -> Option<Vec<Value>> {
    let cells = col_data.as_array()?;
    Some(
        cells
            .iter()
            .map(|cell| cell.get("value").cloned().unwrap_or(Value::Null))
            .collect(),
    )
}

/// Flat, header-aligned form of a report
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizedTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl NormalizedTable {
    /// Zero columns means "no data" to downstream consumers
    pub fn has_columns(&self) -> bool {
        !self.headers.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() || self.rows.is_empty()
    }

    /// First `n` rows
    pub fn head(&self, n: usize) -> &[Vec<Value>] {
        &self.rows[..n.min(self.rows.len())]
    }

    /// Position of the first column titled `name`
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Values of column `name`, one per row
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let index = self.column_index(name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(index).unwrap_or(&Value::Null))
                .collect(),
        )
    }

    /// Plain text rendering of the headers and the first `limit` rows
    pub fn render(&self, limit: usize) -> String {
        let mut lines = vec![self.headers.join(" | ")];
        for row in self.head(limit) {
            let cells: Vec<String> = row.iter().map(cell_text).collect();
            lines.push(cells.join(" | "));
        }
        lines.join("\n")
    }
}

/// Display text of a cell; null renders empty
pub fn cell_text(cell: &Value) -> String {
    match cell {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Column titles in document order
///
/// Each column takes its first non-empty candidate title, or "" when none is set.
pub fn extract_headers(document: &Value) -> Vec<String> {
    let Some(columns) = document
        .get("Columns")
        .and_then(|c| c.get("Column"))
        .and_then(|c| c.as_array())
    else {
        return Vec::new();
    };

    columns
        .iter()
        .map(|column| {
            COLUMN_TITLE_FIELDS
                .iter()
                .filter_map(|field| column.get(*field).and_then(|v| v.as_str()))
                .find(|title| !title.is_empty())
                .unwrap_or_default()
                .to_string()
        })
        .collect()
}

/// Normalize a report document into a header-aligned table
///
/// Rows shorter than the header are padded with nulls; longer rows are kept
/// whole. No row is ever dropped.
pub fn normalize(document: &Value) -> NormalizedTable {
    let headers = extract_headers(document);

    let mut rows = Vec::new();
    for node in RowNode::decode_collection(document.get("Rows")) {
        node.collect_rows(&mut rows);
    }

    for row in rows.iter_mut() {
        if row.len() < headers.len() {
            row.resize(headers.len(), Value::Null);
        }
    }

    tracing::debug!(
        columns = headers.len(),
        rows = rows.len(),
        "Normalized report"
    );

    NormalizedTable { headers, rows }
}

/// Account and amount pulled from a balance-sheet style report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountTotal {
    pub account: String,
    pub total: f64,
}

/// Collect `Data` rows as account totals
///
/// The first cell is the account label, the second the amount. Rows whose
/// amount does not parse are skipped; sections are walked recursively.
pub fn account_totals(document: &Value) -> Vec<AccountTotal> {
    let mut out = Vec::new();
    if let Some(rows) = document.get("Rows") {
        walk_account_rows(rows, &mut out);
    }
    out
}

fn walk_account_rows(rows: &Value, out: &mut Vec<AccountTotal>) {
    let Some(items) = rows.get("Row").and_then(|r| r.as_array()) else {
        return;
    };

    for row in items {
        let is_data = row.get("type").and_then(|t| t.as_str()) == Some("Data");
        match row.get("ColData").and_then(|c| c.as_array()) {
            Some(col_data) if is_data => {
                if col_data.len() < 2 {
                    continue;
                }
                let account = col_data[0]
                    .get("value")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                let total = col_data[1]
                    .get("value")
                    .and_then(|v| v.as_str())
                    .and_then(|v| v.trim().parse::<f64>().ok());
                if let Some(total) = total {
                    out.push(AccountTotal { account, total });
                }
            }
            _ => {
                if let Some(children) = row.get("Rows") {
                    walk_account_rows(children, out);
                }
            }
        }
    }
}
