use std::collections::HashMap;

use polars::prelude::*;

use crate::error::{PipelineError, Result};

/// Collapses duplicate records that share `key_fields`, keeping the one with
/// the maximum `tie_break_field` value. Nulls sort below any timestamp, ties
/// are broken last-wins by input order, and surviving rows come out in the
/// stable order of each key's first occurrence.
pub fn remove_duplicates(
    df: &DataFrame,
    key_fields: &[&str],
    tie_break_field: &str,
) -> Result<DataFrame> {
    if df.is_empty() {
        return Ok(df.clone());
    }

    let tie_break = df
        .column(tie_break_field)
        .map_err(|_| {
            PipelineError::Schema(format!("tie-break field '{tie_break_field}' is missing"))
        })?
        .datetime()
        .map_err(|_| {
            PipelineError::Schema(format!(
                "tie-break field '{tie_break_field}' must be a datetime column"
            ))
        })?;

    let mut key_columns = Vec::with_capacity(key_fields.len());
    for field in key_fields {
        let column = df.column(field).map_err(|_| {
            PipelineError::Schema(format!("key field '{field}' is missing"))
        })?;
        key_columns.push(column);
    }

    // Composite key rendered as a joined string, same trick the file-set
    // signatures use elsewhere in the pipeline.
    let mut winners: HashMap<String, usize> = HashMap::with_capacity(df.height());
    let mut key_order: Vec<String> = Vec::new();
    let mut best: Vec<(Option<i64>, u32)> = Vec::new();

    for idx in 0..df.height() {
        let mut key = String::new();
        for column in &key_columns {
            let value = column.get(idx)?;
            key.push_str(&value.to_string());
            key.push('\u{1f}');
        }

        let candidate = tie_break.get(idx);
        match winners.get(&key) {
            Some(&slot) => {
                // >= keeps the later row on exact ties (last-wins).
                if candidate >= best[slot].0 {
                    best[slot] = (candidate, idx as u32);
                }
            }
            None => {
                winners.insert(key.clone(), best.len());
                key_order.push(key);
                best.push((candidate, idx as u32));
            }
        }
    }

    let indices: Vec<u32> = key_order
        .iter()
        .map(|key| best[winners[key]].1)
        .collect();
    let taken = df.take(&IdxCa::from_vec("idx".into(), indices))?;
    Ok(taken)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    fn datetime_series(name: &str, micros: Vec<Option<i64>>) -> Series {
        Series::new(name.into(), micros)
            .cast(&DataType::Datetime(TimeUnit::Microseconds, None))
            .expect("cast to datetime")
    }

    fn frame(keys: Vec<&str>, trans: Vec<i64>, modify: Vec<Option<i64>>) -> DataFrame {
        let mut frame = df![
            "Customer" => keys,
            "TransId" => trans,
        ]
        .expect("construct frame");
        frame
            .with_column(datetime_series("ModifyDate", modify))
            .expect("attach tie-break");
        frame
    }

    #[test]
    fn keeps_record_with_max_tie_break() {
        let frame = frame(
            vec!["a", "a", "b"],
            vec![1, 1, 2],
            vec![Some(100), Some(200), Some(50)],
        );
        let result = remove_duplicates(&frame, &["Customer", "TransId"], "ModifyDate")
            .expect("dedupe");
        assert_eq!(result.height(), 2);
        let modify = result.column("ModifyDate").unwrap().datetime().unwrap();
        assert_eq!(modify.get(0), Some(200));
        assert_eq!(modify.get(1), Some(50));
    }

    #[test]
    fn no_two_rows_share_a_key() {
        let frame = frame(
            vec!["a", "b", "a", "b", "a"],
            vec![1, 1, 1, 1, 1],
            vec![Some(5), Some(4), Some(3), Some(2), Some(1)],
        );
        let result = remove_duplicates(&frame, &["Customer", "TransId"], "ModifyDate")
            .expect("dedupe");
        assert_eq!(result.height(), 2);
    }

    #[test]
    fn null_tie_break_loses_to_any_value() {
        let frame = frame(vec!["a", "a"], vec![1, 1], vec![None, Some(1)]);
        let result = remove_duplicates(&frame, &["Customer", "TransId"], "ModifyDate")
            .expect("dedupe");
        assert_eq!(result.height(), 1);
        let modify = result.column("ModifyDate").unwrap().datetime().unwrap();
        assert_eq!(modify.get(0), Some(1));
    }

    #[test]
    fn exact_tie_keeps_last_row() {
        let mut frame = df![
            "Customer" => ["a", "a"],
            "TransId" => [1i64, 1],
            "Stake" => [10.0, 20.0],
        ]
        .expect("construct frame");
        frame
            .with_column(datetime_series("ModifyDate", vec![Some(7), Some(7)]))
            .expect("attach tie-break");

        let result = remove_duplicates(&frame, &["Customer", "TransId"], "ModifyDate")
            .expect("dedupe");
        assert_eq!(result.height(), 1);
        let stake = result.column("Stake").unwrap().f64().unwrap();
        assert_eq!(stake.get(0), Some(20.0));
    }

    #[test]
    fn output_preserves_first_occurrence_order() {
        let frame = frame(
            vec!["z", "a", "z", "m"],
            vec![9, 1, 9, 5],
            vec![Some(1), Some(2), Some(3), Some(4)],
        );
        let result = remove_duplicates(&frame, &["Customer", "TransId"], "ModifyDate")
            .expect("dedupe");
        let customers = result.column("Customer").unwrap().str().unwrap();
        assert_eq!(customers.get(0), Some("z"));
        assert_eq!(customers.get(1), Some("a"));
        assert_eq!(customers.get(2), Some("m"));
    }

    #[test]
    fn missing_tie_break_field_is_schema_error() {
        let frame = df![
            "Customer" => ["a"],
            "TransId" => [1i64],
        ]
        .expect("construct frame");
        let err =
            remove_duplicates(&frame, &["Customer", "TransId"], "ModifyDate").unwrap_err();
        assert!(matches!(err, PipelineError::Schema(_)));
    }
}
