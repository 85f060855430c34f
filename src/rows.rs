//! Ordered row model shared by the pipeline stages
//!
//! Rows arrive already parsed from the external file-format collaborator as
//! ordered column -> scalar mappings. `serde_json`'s `preserve_order`
//! feature keeps column order stable through deserialize, transform, and
//! serialize, which the field-preservation guarantee depends on.

use serde_json::Value;

/// One input record: ordered mapping of column name to scalar value
pub type Row = serde_json::Map<String, Value>;

/// Column names prepended to every verification record
pub const DECISION_COLUMN: &str = "Decision";
pub const REASON_COLUMN: &str = "Reason";

/// String value of a column, if present and a string
pub fn field_str<'a>(row: &'a Row, column: &str) -> Option<&'a str> {
    row.get(column).and_then(Value::as_str)
}

/// Build a verification record: `Decision` and `Reason` first, then every
/// original field in its original order.
pub fn annotate(row: &Row, decision: crate::rules::Decision, reason: &str) -> Row {
    let mut record = Row::new();
    record.insert(
        DECISION_COLUMN.to_string(),
        Value::String(decision.as_code().to_string()),
    );
    record.insert(REASON_COLUMN.to_string(), Value::String(reason.to_string()));
    for (name, value) in row {
        record.insert(name.clone(), value.clone());
    }
    record
}

/// Unique subject identifiers from a column, in first-appearance order.
/// Rows without the column (or with a blank value) contribute nothing.
pub fn subject_ids(rows: &[Row], column: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for row in rows {
        let Some(id) = field_str(row, column).map(str::trim).filter(|id| !id.is_empty()) else {
            continue;
        };
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Decision;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> Row {
        let mut row = Row::new();
        for (name, value) in pairs {
            row.insert(name.to_string(), value.clone());
        }
        row
    }

    #[test]
    fn test_annotate_prepends_and_preserves_order() {
        let input = row(&[
            ("Email Address", json!("a@b.com")),
            ("User Name", json!("user-1")),
            ("Amount", json!(12.5)),
            ("Active", json!(true)),
            ("Notes", json!(null)),
        ]);

        let record = annotate(&input, Decision::Verified, "Email matches user metadata");

        let columns: Vec<&String> = record.keys().collect();
        assert_eq!(
            columns,
            vec!["Decision", "Reason", "Email Address", "User Name", "Amount", "Active", "Notes"]
        );
        assert_eq!(record["Decision"], json!("Y"));
        assert_eq!(record["Reason"], json!("Email matches user metadata"));
        assert_eq!(record["Amount"], json!(12.5));
        assert_eq!(record["Notes"], json!(null));
    }

    #[test]
    fn test_subject_ids_dedup_first_appearance() {
        let rows = vec![
            row(&[("User Name", json!("b"))]),
            row(&[("User Name", json!("a"))]),
            row(&[("User Name", json!("b"))]),
            row(&[("User Name", json!("  "))]),
            row(&[("Other", json!("c"))]),
        ];
        assert_eq!(subject_ids(&rows, "User Name"), vec!["b", "a"]);
    }

    #[test]
    fn test_rows_roundtrip_preserves_column_order() {
        let raw = r#"[{"Z":"1","A":"2","M":"3"}]"#;
        let rows: Vec<Row> = serde_json::from_str(raw).unwrap();
        let back = serde_json::to_string(&rows).unwrap();
        assert_eq!(back, raw);
    }
}
