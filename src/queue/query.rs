use rusqlite::Statement;

use crate::results::ResultSet;
use crate::types::Value;

/// Run a prepared statement and collect its rows.
///
/// Statements that produce no columns (DML, DDL) are executed instead and report the number
/// of changed rows.
pub(crate) fn build_result_set(
    stmt: &mut Statement<'_>,
    params: &[Value],
) -> rusqlite::Result<ResultSet> {
    if stmt.column_count() == 0 {
        let changed = stmt.execute(rusqlite::params_from_iter(params.iter()))?;
        return Ok(ResultSet::affected(changed));
    }

    let column_names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();
    let col_count = column_names.len();

    let mut result_set = ResultSet::with_columns(column_names, 10);
    let mut rows_iter = stmt.query(rusqlite::params_from_iter(params.iter()))?;
    while let Some(row) = rows_iter.next()? {
        let mut values = Vec::with_capacity(col_count);
        for i in 0..col_count {
            let value: rusqlite::types::Value = row.get(i)?;
            values.push(Value::from(value));
        }
        result_set.push_values(values);
    }

    Ok(result_set)
}
