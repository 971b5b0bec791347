use std::collections::{BTreeMap, HashSet};

use log::{debug, info};
use rusqlite::types::Value;
use serde::Deserialize;

use crate::condition::SqlValue;
use crate::context::MigrationContext;
use crate::error::StagewiseError;
use crate::step::Step;

use super::Operate;

/// Moves the values of a preserved legacy column into derived records of
/// another table, then drops the legacy column.
///
/// For every row whose legacy value is set, non-empty and different from
/// `default`, one record is inserted into `target_table` per distinct key:
/// `target_key_column` receives the row's `key_column` (formatted through
/// `key_format`, where `{}` stands for the key), `target_value_column`
/// receives the value, and every `fixed` column its constant. When a key
/// repeats, the lowest of its values is kept.
///
/// Dropping the column is the last action, and an absent legacy column makes
/// the operation a no-op, so the data is migrated at most once.
#[derive(Debug, Clone, Deserialize)]
pub struct RelocateLegacyColumn {
    pub table: String,
    pub field: String,
    pub key_column: String,
    #[serde(default)]
    pub default: Option<SqlValue>,
    pub target_table: String,
    pub target_key_column: String,
    #[serde(default)]
    pub key_format: Option<String>,
    pub target_value_column: String,
    #[serde(default)]
    pub fixed: BTreeMap<String, SqlValue>,
}

fn key_text(value: &Value) -> Option<String> {
    match value {
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(r) => Some(r.to_string()),
        Value::Text(s) => Some(s.clone()),
        Value::Null | Value::Blob(_) => None,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Text(s) => s.is_empty(),
        _ => false,
    }
}

impl Operate for RelocateLegacyColumn {
    fn apply(&self, step: &Step, ctx: &mut MigrationContext) -> Result<(), StagewiseError> {
        let legacy_name = ctx.legacy_name(&self.field);
        let probe = ctx.probe();

        if !probe.column_exists(&self.table, &legacy_name)? {
            debug!(
                "Step '{}': legacy column {}.{} absent, nothing to relocate",
                step.id, self.table, legacy_name
            );
            return Ok(());
        }

        let table = probe.checked_table(&self.table)?;
        let legacy = probe.checked_column(&table, &legacy_name)?;
        let key = probe.checked_column(&table, &self.key_column)?;
        let target = probe.checked_table(&self.target_table)?;

        let mut target_columns = vec![
            probe.checked_column(&target, &self.target_key_column)?,
            probe.checked_column(&target, &self.target_value_column)?,
        ];
        for column in self.fixed.keys() {
            target_columns.push(probe.checked_column(&target, column)?);
        }

        let rows: Vec<(Value, Value)> = {
            let (sql, params) = match &self.default {
                Some(default) => (
                    format!(
                        "SELECT {key}, {legacy} FROM {table} WHERE {legacy} <> ?1 ORDER BY {key}, {legacy}",
                        key = key,
                        legacy = legacy,
                        table = table
                    ),
                    vec![default.clone()],
                ),
                None => (
                    format!(
                        "SELECT {key}, {legacy} FROM {table} WHERE {legacy} IS NOT NULL ORDER BY {key}, {legacy}",
                        key = key,
                        legacy = legacy,
                        table = table
                    ),
                    Vec::new(),
                ),
            };
            let mut stmt = ctx.conn().prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                    Ok((row.get::<_, Value>(0)?, row.get::<_, Value>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        debug!(
            "Step '{}': {} row(s) of {} carry a non-default {}",
            step.id,
            rows.len(),
            self.table,
            self.field
        );

        let column_list = target_columns
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let marks = vec!["?"; target_columns.len()].join(", ");
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            target, column_list, marks
        );

        let mut seen = HashSet::new();
        let mut inserted = 0usize;
        {
            let mut insert = ctx.conn().prepare(&insert_sql)?;
            for (key_value, value) in rows {
                if is_empty(&value) {
                    continue;
                }
                let Some(key) = key_text(&key_value) else {
                    continue;
                };
                if !seen.insert(key.clone()) {
                    continue;
                }

                let target_key = match &self.key_format {
                    Some(format) => Value::Text(format.replace("{}", &key)),
                    None => key_value,
                };
                let mut params: Vec<Value> = vec![target_key, value];
                params.extend(self.fixed.values().map(sql_value));
                insert.execute(rusqlite::params_from_iter(params.iter()))?;
                inserted += 1;
            }
        }

        ctx.conn().execute_batch(&format!(
            "ALTER TABLE {} DROP COLUMN {}",
            table, legacy
        ))?;

        info!(
            "Step '{}': relocated {} value(s) of {}.{} into {} and dropped {}",
            step.id, inserted, self.table, self.field, self.target_table, legacy_name
        );
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "relocate legacy {}.{} into {}",
            self.table, self.field, self.target_table
        )
    }
}

fn sql_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Bool(b) => Value::Integer(i64::from(*b)),
        SqlValue::Int(i) => Value::Integer(*i),
        SqlValue::Real(r) => Value::Real(*r),
        SqlValue::Text(s) => Value::Text(s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::test_support::{context, count};
    use pretty_assertions::assert_eq;

    const SCHEMA: &str = "
        CREATE TABLE product_product (
            id INTEGER PRIMARY KEY,
            product_tmpl_id INTEGER,
            openupgrade_legacy_8_0_valuation TEXT
        );
        INSERT INTO product_product (product_tmpl_id, openupgrade_legacy_8_0_valuation) VALUES
            (1, 'real_time'),
            (2, 'manual_periodic'),
            (3, 'real_time'),
            (4, 'manual_periodic'),
            (5, 'real_time');
        CREATE TABLE ir_property (
            id INTEGER PRIMARY KEY,
            res_id TEXT,
            value_text TEXT,
            name TEXT,
            type TEXT,
            fields_id INTEGER
        );
    ";

    fn relocate_valuation() -> RelocateLegacyColumn {
        let mut fixed = BTreeMap::new();
        fixed.insert("name".to_string(), SqlValue::from("valuation"));
        fixed.insert("type".to_string(), SqlValue::from("selection"));
        fixed.insert("fields_id".to_string(), SqlValue::Int(42));
        RelocateLegacyColumn {
            table: "product_product".into(),
            field: "valuation".into(),
            key_column: "product_tmpl_id".into(),
            default: Some("manual_periodic".into()),
            target_table: "ir_property".into(),
            target_key_column: "res_id".into(),
            key_format: Some("product.template,{}".into()),
            target_value_column: "value_text".into(),
            fixed,
        }
    }

    fn legacy_present(ctx: &MigrationContext) -> bool {
        ctx.probe()
            .column_exists("product_product", "openupgrade_legacy_8_0_valuation")
            .unwrap()
    }

    #[test]
    fn test_three_non_default_values_make_three_records() {
        let (mut ctx, _) = context(SCHEMA);
        relocate_valuation()
            .apply(&Step::new("product_valuation", "8.0"), &mut ctx)
            .unwrap();

        assert_eq!(count(&ctx, "SELECT COUNT(*) FROM ir_property"), 3);
        assert!(!legacy_present(&ctx));

        let mut stmt = ctx
            .conn()
            .prepare("SELECT res_id, value_text, name, type, fields_id FROM ir_property ORDER BY id")
            .unwrap();
        let rows: Vec<(String, String, String, String, i64)> = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            rows[0],
            (
                "product.template,1".to_string(),
                "real_time".to_string(),
                "valuation".to_string(),
                "selection".to_string(),
                42
            )
        );
        assert_eq!(rows[2].0, "product.template,5");
    }

    #[test]
    fn test_second_application_is_noop() {
        let (mut ctx, _) = context(SCHEMA);
        let step = Step::new("product_valuation", "8.0");
        relocate_valuation().apply(&step, &mut ctx).unwrap();
        relocate_valuation().apply(&step, &mut ctx).unwrap();
        assert_eq!(count(&ctx, "SELECT COUNT(*) FROM ir_property"), 3);
    }

    #[test]
    fn test_missing_legacy_column_leaves_schema_unchanged() {
        let (mut ctx, _) = context(
            "CREATE TABLE product_product (id INTEGER PRIMARY KEY, product_tmpl_id INTEGER);
             CREATE TABLE ir_property (id INTEGER PRIMARY KEY, res_id TEXT, value_text TEXT);",
        );
        let before = ctx.probe().columns("product_product").unwrap();
        let op = RelocateLegacyColumn {
            fixed: BTreeMap::new(),
            ..relocate_valuation()
        };
        op.apply(&Step::new("product_valuation", "8.0"), &mut ctx).unwrap();

        assert_eq!(ctx.probe().columns("product_product").unwrap(), before);
        assert_eq!(count(&ctx, "SELECT COUNT(*) FROM ir_property"), 0);
    }

    #[test]
    fn test_repeated_keys_and_empty_values_skipped() {
        let (mut ctx, _) = context(SCHEMA);
        ctx.conn()
            .execute_batch(
                "INSERT INTO product_product (product_tmpl_id, openupgrade_legacy_8_0_valuation) VALUES
                    (1, 'real_time'),
                    (6, ''),
                    (7, NULL),
                    (NULL, 'real_time');",
            )
            .unwrap();
        relocate_valuation()
            .apply(&Step::new("product_valuation", "8.0"), &mut ctx)
            .unwrap();
        assert_eq!(count(&ctx, "SELECT COUNT(*) FROM ir_property"), 3);
    }

    #[test]
    fn test_without_default_or_format() {
        let (mut ctx, _) = context(SCHEMA);
        let op = RelocateLegacyColumn {
            default: None,
            key_format: None,
            ..relocate_valuation()
        };
        op.apply(&Step::new("product_valuation", "8.0"), &mut ctx)
            .unwrap();
        assert_eq!(count(&ctx, "SELECT COUNT(*) FROM ir_property"), 5);
        assert_eq!(
            count(&ctx, "SELECT COUNT(*) FROM ir_property WHERE res_id = '2'"),
            1
        );
    }

    #[test]
    fn test_unknown_target_column_keeps_legacy_column() {
        let (mut ctx, _) = context(SCHEMA);
        let op = RelocateLegacyColumn {
            target_value_column: "value_selection".into(),
            ..relocate_valuation()
        };
        assert!(matches!(
            op.apply(&Step::new("product_valuation", "8.0"), &mut ctx),
            Err(StagewiseError::UnknownIdentifier(_))
        ));
        assert!(legacy_present(&ctx));
    }

    #[test]
    fn test_relocates_from_table_without_rowid() {
        let (mut ctx, _) = context(
            "CREATE TABLE product_product (
                id INTEGER PRIMARY KEY,
                product_tmpl_id INTEGER,
                openupgrade_legacy_8_0_valuation TEXT
            ) WITHOUT ROWID;
            INSERT INTO product_product VALUES
                (1, 9, 'real_time'),
                (2, 8, 'standard'),
                (3, 8, 'real_time'),
                (4, 7, 'manual_periodic');
            CREATE TABLE ir_property (
                id INTEGER PRIMARY KEY,
                res_id TEXT,
                value_text TEXT,
                name TEXT,
                type TEXT,
                fields_id INTEGER
            );",
        );
        relocate_valuation()
            .apply(&Step::new("product_valuation", "8.0"), &mut ctx)
            .unwrap();
        assert!(!legacy_present(&ctx));

        let mut stmt = ctx
            .conn()
            .prepare("SELECT res_id, value_text FROM ir_property ORDER BY id")
            .unwrap();
        let rows: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            rows,
            vec![
                ("product.template,8".to_string(), "real_time".to_string()),
                ("product.template,9".to_string(), "real_time".to_string()),
            ]
        );
    }
}
