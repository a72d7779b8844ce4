use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The unit of work a node performs.
///
/// Each variant carries only literal configuration; behaviour lives in
/// `stardag-operators`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperatorDef {
  /// Bulk copy raw files from object storage into a staging table.
  StageLoad(StageLoadDef),
  /// Append-only insert-select into a fact table.
  FactLoad(FactLoadDef),
  /// Insert-select into a dimension table, optionally replacing its contents.
  DimensionLoad(DimensionLoadDef),
  /// Row-count and null checks over loaded tables.
  QualityCheck(QualityCheckDef),
  /// Sentinel for start/end nodes.
  NoOp,
}

impl OperatorDef {
  /// Short, stable name of the variant, used in logs and reports.
  pub fn kind(&self) -> &'static str {
    match self {
      OperatorDef::StageLoad(_) => "stage_load",
      OperatorDef::FactLoad(_) => "fact_load",
      OperatorDef::DimensionLoad(_) => "dimension_load",
      OperatorDef::QualityCheck(_) => "quality_check",
      OperatorDef::NoOp => "no_op",
    }
  }

  /// The table this operator writes to, if any.
  pub fn target_table(&self) -> Option<&str> {
    match self {
      OperatorDef::StageLoad(def) => Some(&def.destination_table),
      OperatorDef::FactLoad(def) => Some(&def.target_table),
      OperatorDef::DimensionLoad(def) => Some(&def.target_table),
      OperatorDef::QualityCheck(_) | OperatorDef::NoOp => None,
    }
  }

  /// Whether this operator loads a fact or dimension table.
  pub fn is_warehouse_load(&self) -> bool {
    matches!(
      self,
      OperatorDef::FactLoad(_) | OperatorDef::DimensionLoad(_)
    )
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageLoadDef {
  /// Source location template, e.g. `s3://bucket/log_data/{{ year }}/{{ month }}`.
  pub source_location_template: String,
  pub destination_table: String,
  /// Delete every row of the destination before copying.
  #[serde(default)]
  pub overwrite: bool,
  #[serde(default)]
  pub format: FormatHint,
  /// Opaque reference resolved by the credential provider.
  pub credentials_id: String,
  /// Object store region, when it differs from the warehouse region.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub region: Option<String>,
}

/// How the bulk copy should parse source files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FormatHint {
  Json {
    /// `auto` or the location of a JSONPaths file.
    #[serde(default = "default_json_paths")]
    paths: String,
  },
  Csv {
    #[serde(default)]
    ignore_header_rows: u32,
  },
}

fn default_json_paths() -> String {
  "auto".to_string()
}

impl Default for FormatHint {
  fn default() -> Self {
    FormatHint::Json {
      paths: default_json_paths(),
    }
  }
}

/// Fact loads never delete: reruns append again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactLoadDef {
  /// The `SELECT ...` whose rows are inserted.
  pub insert_select: String,
  pub target_table: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionLoadDef {
  pub insert_select: String,
  pub target_table: String,
  #[serde(default)]
  pub overwrite: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityCheckDef {
  /// Table name to the column(s) that must contain no nulls.
  pub tables: BTreeMap<String, ColumnSpec>,
}

/// A single column or a list of columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnSpec {
  One(String),
  Many(Vec<String>),
}

impl ColumnSpec {
  pub fn columns(&self) -> &[String] {
    match self {
      ColumnSpec::One(column) => std::slice::from_ref(column),
      ColumnSpec::Many(columns) => columns,
    }
  }
}
