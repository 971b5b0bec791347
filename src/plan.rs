use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::Deserialize;

use crate::error::StagewiseError;
use crate::loader::TomlDataLoader;
use crate::ops::Operation;
use crate::step::{Phase, Step};

#[derive(Debug, Deserialize)]
struct PlanFile {
    #[serde(default, rename = "step")]
    steps: Vec<Step>,
    #[serde(default)]
    data: Vec<PathBuf>,
}

/// An ordered set of migration steps plus the reference data to load
/// between the ordinary steps and the deferred pass.
///
/// Ordinary and deferred steps keep the relative order in which they were
/// declared.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    steps: Vec<Step>,
    data: Vec<PathBuf>,
}

impl Plan {
    pub fn new(steps: Vec<Step>) -> Result<Self, StagewiseError> {
        let plan = Plan {
            steps,
            data: Vec::new(),
        };
        plan.validate()?;
        Ok(plan)
    }

    pub fn with_data(mut self, data: Vec<PathBuf>) -> Self {
        self.data = data;
        self
    }

    /// Reads a TOML plan. Data file paths are taken relative to the plan's directory.
    pub fn from_file(path: &Path) -> Result<Self, StagewiseError> {
        let text = fs::read_to_string(path).map_err(|e| {
            StagewiseError::Error(format!("Failed to read plan {}: {}", path.display(), e))
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let plan = Self::parse(&text, base)?;
        debug!(
            "Loaded plan {} with {} step(s)",
            path.display(),
            plan.steps.len()
        );
        Ok(plan)
    }

    pub fn parse(text: &str, base_dir: &Path) -> Result<Self, StagewiseError> {
        let file: PlanFile = toml::from_str(text)?;
        let data = file
            .data
            .into_iter()
            .map(|p| if p.is_absolute() { p } else { base_dir.join(p) })
            .collect();
        Ok(Self::new(file.steps)?.with_data(data))
    }

    pub fn validate(&self) -> Result<(), StagewiseError> {
        let mut ids = HashSet::new();
        for step in &self.steps {
            if step.id.trim().is_empty() {
                return Err(StagewiseError::InvalidPlan(
                    "step with an empty id".to_string(),
                ));
            }
            if step.target_version.trim().is_empty() {
                return Err(StagewiseError::InvalidPlan(format!(
                    "step '{}' has no target version",
                    step.id
                )));
            }
            if !ids.insert(step.id.as_str()) {
                return Err(StagewiseError::InvalidPlan(format!(
                    "duplicate step id '{}'",
                    step.id
                )));
            }
            if step.phase == Phase::Deferred && !step.idempotent {
                return Err(StagewiseError::InvalidPlan(format!(
                    "deferred step '{}' must be idempotent: the deferred pass repeats on every run",
                    step.id
                )));
            }
            if step.enabled && step.operations.is_empty() {
                return Err(StagewiseError::InvalidPlan(format!(
                    "step '{}' has no operations",
                    step.id
                )));
            }
            let last = step.operations.len().saturating_sub(1);
            if let Some(position) = step
                .operations
                .iter()
                .position(|op| matches!(op, Operation::RelocateLegacyColumn(_)))
            {
                if position != last {
                    return Err(StagewiseError::InvalidPlan(format!(
                        "step '{}': relocate_legacy_column drops its column and must be the step's last operation",
                        step.id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn phase(&self, phase: Phase) -> Vec<&Step> {
        self.steps.iter().filter(|s| s.phase == phase).collect()
    }

    pub fn data_files(&self) -> &[PathBuf] {
        &self.data
    }

    pub fn loader(&self) -> TomlDataLoader {
        TomlDataLoader::new(self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::Precondition;
    use pretty_assertions::assert_eq;

    const PLAN: &str = r#"
        data = ["data/groups.toml", "/abs/extra.toml"]

        [[step]]
        id = "procurement_states"
        target_version = "8.0.1.0"
        module = "procurement"

        [[step.require]]
        kind = "table_exists"
        table = "procurement_order"

        [[step.operation]]
        kind = "map_values"
        table = "procurement_order"
        column = "state"
        from = ["ready", "waiting"]
        to = "running"

        [[step.operation]]
        kind = "warn_count"
        table = "procurement_order"
        column = "state"
        message = "In this database, {count} procurements are in draft state."
        where = [{ op = "eq", column = "state", value = "draft" }]

        [[step]]
        id = "product_valuation"
        target_version = "8.0.1.0"
        phase = "deferred"

        [[step.require]]
        kind = "legacy_column_exists"
        table = "product_product"
        field = "valuation"

        [[step.operation]]
        kind = "relocate_legacy_column"
        table = "product_product"
        field = "valuation"
        key_column = "product_tmpl_id"
        default = "manual_periodic"
        target_table = "ir_property"
        target_key_column = "res_id"
        key_format = "product.template,{}"
        target_value_column = "value_text"
        fixed = { name = "valuation", type = "selection" }

        [[step]]
        id = "procurement_rules"
        target_version = "8.0.1.0"
        phase = "deferred"
        enabled = false
        disabled_reason = "rule assignment left disabled"
    "#;

    #[test]
    fn test_parse_plan() {
        let plan = Plan::parse(PLAN, Path::new("/plans")).unwrap();
        assert_eq!(plan.steps().len(), 3);

        let ordinary = plan.phase(Phase::Ordinary);
        assert_eq!(ordinary.len(), 1);
        assert_eq!(ordinary[0].id, "procurement_states");
        assert_eq!(ordinary[0].module.as_deref(), Some("procurement"));
        assert!(ordinary[0].idempotent);
        assert_eq!(
            ordinary[0].preconditions,
            vec![Precondition::TableExists { table: "procurement_order".into() }]
        );
        assert!(matches!(ordinary[0].operations[1], Operation::WarnCount(_)));

        let deferred = plan.phase(Phase::Deferred);
        assert_eq!(
            deferred.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            vec!["product_valuation", "procurement_rules"]
        );
        assert!(!deferred[1].enabled);

        assert_eq!(
            plan.data_files(),
            &[
                PathBuf::from("/plans/data/groups.toml"),
                PathBuf::from("/abs/extra.toml")
            ]
        );
        assert_eq!(plan.loader().files().len(), 2);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.toml");
        fs::write(&path, PLAN).unwrap();
        let plan = Plan::from_file(&path).unwrap();
        assert_eq!(plan.data_files()[0], dir.path().join("data/groups.toml"));
        assert!(Plan::from_file(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let text = r#"
            [[step]]
            id = "a"
            target_version = "8.0"
            operation = [{ kind = "sql", sql = "SELECT 1" }]

            [[step]]
            id = "a"
            target_version = "8.0"
            operation = [{ kind = "sql", sql = "SELECT 1" }]
        "#;
        assert!(matches!(
            Plan::parse(text, Path::new(".")),
            Err(StagewiseError::InvalidPlan(_))
        ));
    }

    #[test]
    fn test_non_idempotent_deferred_rejected() {
        let step = Step::new("a", "8.0")
            .deferred()
            .non_idempotent()
            .operation(crate::ops::SqlOp::new("SELECT 1"));
        assert!(matches!(Plan::new(vec![step]), Err(StagewiseError::InvalidPlan(_))));
    }

    #[test]
    fn test_enabled_step_needs_operations() {
        assert!(matches!(
            Plan::new(vec![Step::new("empty", "8.0")]),
            Err(StagewiseError::InvalidPlan(_))
        ));
        assert!(Plan::new(vec![Step::new("empty", "8.0").disabled("parked")]).is_ok());
    }

    #[test]
    fn test_empty_id_and_version_rejected() {
        let op = crate::ops::SqlOp::new("SELECT 1");
        assert!(Plan::new(vec![Step::new(" ", "8.0").operation(op.clone())]).is_err());
        assert!(Plan::new(vec![Step::new("a", "").operation(op)]).is_err());
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            Plan::parse("[[step]\nid =", Path::new(".")),
            Err(StagewiseError::TomlError(_))
        ));
    }

    #[test]
    fn test_nothing_may_follow_a_column_relocation() {
        let text = r#"
            [[step]]
            id = "product_valuation"
            target_version = "8.0.1.0"
            phase = "deferred"

            [[step.operation]]
            kind = "relocate_legacy_column"
            table = "product_product"
            field = "valuation"
            key_column = "product_tmpl_id"
            target_table = "ir_property"
            target_key_column = "res_id"
            target_value_column = "value_text"

            [[step.operation]]
            kind = "sql"
            sql = "UPDATE product_product SET {legacy:product_product.valuation} = NULL"
        "#;
        assert!(matches!(
            Plan::parse(text, Path::new(".")),
            Err(StagewiseError::InvalidPlan(_))
        ));

        let trailing_sql = text.rfind("[[step.operation]]").unwrap();
        assert!(Plan::parse(&text[..trailing_sql], Path::new(".")).is_ok());
    }
}
